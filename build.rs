use std::process::Command;

fn main() {
    // embed git hash in executable, referenced with env!()
    let output = Command::new("git").args(["describe", "--always", "--dirty"]).output();
    let git_hash = match output {
        Ok(o) if o.status.success() => String::from_utf8(o.stdout).unwrap_or_default(),
        _ => String::new(),
    };
    let git_hash = git_hash.trim();
    let git_hash = if git_hash.is_empty() { "unknown" } else { git_hash };
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/master");
    println!("cargo:rerun-if-changed=src/");
    println!("cargo:rustc-env=BUILD_TIME_GIT_HASH={}", git_hash);
}
