//! Request pipeline for the Comfort Cloud API.
//!
//! Every call goes through `ApiClient::send`: obtain a valid token from the
//! `TokenManager`, attach the mobile-app header set, execute, then interpret
//! the result. The service reports business errors both as non-2xx envelopes
//! and as 200 responses whose body carries a `message` field; both paths end
//! up in `ApiError::from_envelope`.

use chrono::Local;
use log::debug;
use serde::de::{DeserializeOwned, IntoDeserializer};

use crate::auth::{Token, TokenManager};
use crate::error::{ApiError, ERROR_CODE_UPDATE_VERSION};
use crate::models::comfortcloud::{
    DeviceDto, ErrorEnvelope, GetGroupsResponse, ParametersDto, SetDeviceParametersRequest,
    SetDeviceParametersResponse,
};
use crate::utils;

pub const BASE_PATH_ACC: &str = "https://accsmart.panasonic.com";

const API_KEY_LENGTH: usize = 128;

/// Header set the vendor's mobile app sends on every API request. The
/// `x-cfc-api-key` value is not validated server-side beyond its shape and is
/// regenerated per request.
pub(crate) fn app_headers(request: ureq::Request, app_version: &str) -> ureq::Request {
    request
        .set("Accept", "application/json; charset=UTF-8")
        .set("User-Agent", "G-RAC")
        .set("x-app-name", "Comfort Cloud")
        .set("x-app-timestamp", &Local::now().format("%Y-%m-%d %H:%M:%S").to_string())
        .set("x-app-type", "1")
        .set("x-app-version", app_version)
        .set("x-cfc-api-key", &utils::generate_random_hex(API_KEY_LENGTH))
}

/// Device guids can contain `/`, which the service cannot accept in a path
/// segment even percent-encoded; the mobile app substitutes `f` first.
fn escape_device_id(device_id: &str) -> String {
    urlencoding::encode(&device_id.replace('/', "f")).into_owned()
}

/// One API call: a display name for log and error messages, the path, and an
/// optional JSON body (present means POST).
pub struct ApiRequest {
    pub name: &'static str,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get_groups() -> ApiRequest {
        ApiRequest {
            name: "group listing",
            path: "/device/group".to_string(),
            body: None,
        }
    }

    pub fn get_device(device_id: &str) -> ApiRequest {
        ApiRequest {
            name: "device status",
            path: format!("/deviceStatus/{}", escape_device_id(device_id)),
            body: None,
        }
    }

    pub fn set_device_parameters(request: &SetDeviceParametersRequest) -> Result<ApiRequest, ApiError> {
        let body = serde_json::to_value(request)
            .map_err(|e| ApiError::Communication(format!("unable to serialize device command: {}", e)))?;
        Ok(ApiRequest {
            name: "device command",
            path: "/deviceStatus/control".to_string(),
            body: Some(body),
        })
    }
}

pub struct ApiClient {
    agent: ureq::Agent,
    api_base: String,
    app_version: String,
    tokens: TokenManager,
}

impl ApiClient {
    pub fn new(agent: ureq::Agent, api_base: impl Into<String>, app_version: impl Into<String>, tokens: TokenManager) -> Self {
        ApiClient {
            agent,
            api_base: api_base.into(),
            app_version: app_version.into(),
            tokens,
        }
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    pub fn get_groups(&mut self) -> Result<GetGroupsResponse, ApiError> {
        self.send(&ApiRequest::get_groups())
    }

    pub fn get_device(&mut self, device_id: &str) -> Result<DeviceDto, ApiError> {
        self.send(&ApiRequest::get_device(device_id))
    }

    pub fn set_device_parameters(
        &mut self,
        device_guid: &str,
        parameters: ParametersDto,
    ) -> Result<SetDeviceParametersResponse, ApiError> {
        let request = SetDeviceParametersRequest {
            device_guid: device_guid.to_string(),
            parameters,
        };
        self.send(&ApiRequest::set_device_parameters(&request)?)
    }

    fn send<T: DeserializeOwned>(&mut self, request: &ApiRequest) -> Result<T, ApiError> {
        let token = self.tokens.obtain_valid_token()?;
        let url = format!("{}{}", self.api_base, request.path);
        debug!("Sending {} request to {}", request.name, request.path);

        let prepared = self.prepare(request, &token, &url);
        let result = match &request.body {
            Some(body) => prepared.send_json(body),
            None => prepared.call(),
        };

        match result {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .into_string()
                    .map_err(|e| ApiError::Communication(format!("{}: unable to read body: {}", request.name, e)))?;
                let value: serde_json::Value = serde_json::from_str(&body)
                    .map_err(|e| ApiError::Communication(format!("{}: body is not JSON: {}", request.name, e)))?;
                if value.get("message").is_some() {
                    let envelope: ErrorEnvelope = serde_json::from_value(value).unwrap_or_default();
                    return Err(ApiError::from_envelope(
                        envelope.code.unwrap_or(-1),
                        envelope.message.as_deref().unwrap_or(""),
                        status,
                        &self.app_version,
                    ));
                }
                let deserializer = value.into_deserializer();
                serde_path_to_error::deserialize(deserializer).map_err(|e| {
                    ApiError::Communication(format!(
                        "{}: unexpected response shape at {}: {}",
                        request.name,
                        e.path(),
                        e.inner()
                    ))
                })
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                let envelope: ErrorEnvelope = serde_json::from_str(&body).unwrap_or_default();
                if status == 401 && envelope.code != Some(ERROR_CODE_UPDATE_VERSION) {
                    // token rejected ahead of its bookkeeping expiry; force a
                    // full login on the next call
                    self.tokens.invalidate();
                }
                match envelope.code {
                    Some(code) => Err(ApiError::from_envelope(
                        code,
                        envelope.message.as_deref().unwrap_or(""),
                        status,
                        &self.app_version,
                    )),
                    None => Err(ApiError::Communication(format!(
                        "{}: http {}: {}",
                        request.name, status, body
                    ))),
                }
            }
            Err(ureq::Error::Transport(t)) => {
                Err(ApiError::Communication(format!("{}: transport error: {}", request.name, t)))
            }
        }
    }

    fn prepare(&self, request: &ApiRequest, token: &Token, url: &str) -> ureq::Request {
        let method = if request.body.is_some() { "POST" } else { "GET" };
        app_headers(self.agent.request(method, url), &self.app_version)
            .set("x-user-authorization-v2", &format!("Bearer {}", token.access_token))
            .set("x-client-id", &token.client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Authenticator, store_token};
    use crate::storage::MemoryTokenStore;
    use chrono::Utc;
    use httpmock::prelude::*;

    struct PanicAuthenticator;

    impl Authenticator for PanicAuthenticator {
        fn authenticate(&self) -> Result<Token, ApiError> {
            panic!("authenticate must not be called, a valid token is stored");
        }

        fn refresh(&self, _token: &Token) -> Result<Token, ApiError> {
            panic!("refresh must not be called, a valid token is stored");
        }
    }

    fn client_with(server: &MockServer, authenticator: Box<dyn Authenticator>) -> ApiClient {
        let mut store = MemoryTokenStore::default();
        store_token(
            &mut store,
            &Token {
                access_token: "at-test".to_string(),
                refresh_token: "rt-test".to_string(),
                client_id: "client-test".to_string(),
                expiry: Utc::now().timestamp() + 86400,
                scope: "openid".to_string(),
            },
        );
        let tokens = TokenManager::new(Box::new(store), authenticator);
        let agent = ureq::AgentBuilder::new().redirects(0).build();
        ApiClient::new(agent, server.base_url(), "1.21.0", tokens)
    }

    fn client_for(server: &MockServer) -> ApiClient {
        client_with(server, Box::new(PanicAuthenticator))
    }

    #[test]
    fn group_listing_carries_app_and_auth_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/device/group")
                .header("x-user-authorization-v2", "Bearer at-test")
                .header("x-client-id", "client-test")
                .header("x-app-type", "1")
                .header("x-app-version", "1.21.0")
                .header("User-Agent", "G-RAC")
                .header_exists("x-cfc-api-key")
                .header_exists("x-app-timestamp");
            then.status(200).json_body(serde_json::json!({
                "groupCount": 1,
                "groupList": [
                    { "groupId": "g-1", "groupName": "Home", "deviceList": [] }
                ]
            }));
        });

        let response = client_for(&server).get_groups().expect("request succeeds");
        assert_eq!(response.group_list.len(), 1);
        mock.assert();
    }

    #[test]
    fn business_error_in_200_body_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/device/group");
            then.status(200)
                .json_body(serde_json::json!({ "code": 4100, "message": "Token expires" }));
        });

        let err = client_for(&server).get_groups().expect_err("business error");
        match err {
            ApiError::Communication(msg) => {
                assert!(msg.contains("4100"));
                assert!(msg.contains("Token expires"));
            }
            other => panic!("unexpected error kind: {:?}", other),
        }
    }

    #[test]
    fn envelope_code_4106_maps_to_app_version_outdated() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/device/group");
            then.status(401)
                .json_body(serde_json::json!({ "code": 4106, "message": "Update required" }));
        });

        let err = client_for(&server).get_groups().expect_err("version error");
        assert!(matches!(err, ApiError::AppVersionOutdated { .. }));
    }

    #[test]
    fn device_command_posts_body_and_parses_result() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/deviceStatus/control")
                .body_contains("\"deviceGuid\":\"CZ-TACG1+A1\"")
                .body_contains("\"operate\":1");
            then.status(200).json_body(serde_json::json!({ "code": 0 }));
        });

        let parameters = ParametersDto {
            operate: Some(1),
            operation_mode: Some(3),
            ..Default::default()
        };
        let response = client_for(&server)
            .set_device_parameters("CZ-TACG1+A1", parameters)
            .expect("command accepted");
        assert_eq!(response.code, 0);
        mock.assert();
    }

    #[test]
    fn device_id_slashes_are_substituted_before_encoding() {
        assert_eq!(escape_device_id("CZ-TACG1+A1"), "CZ-TACG1%2BA1");
        assert_eq!(escape_device_id("ab/cd ef"), "abfcd%20ef");
    }

    struct FreshLoginAuthenticator;

    impl Authenticator for FreshLoginAuthenticator {
        fn authenticate(&self) -> Result<Token, ApiError> {
            Ok(Token {
                access_token: "at-new".to_string(),
                refresh_token: "rt-new".to_string(),
                client_id: "client-new".to_string(),
                expiry: Utc::now().timestamp() + 86400,
                scope: "openid".to_string(),
            })
        }

        fn refresh(&self, _token: &Token) -> Result<Token, ApiError> {
            panic!("refresh must not be called after invalidation");
        }
    }

    #[test]
    fn rejected_token_forces_full_login_on_next_call() {
        let server = MockServer::start();
        let rejected = server.mock(|when, then| {
            when.method(GET)
                .path("/device/group")
                .header("x-user-authorization-v2", "Bearer at-test");
            then.status(401)
                .json_body(serde_json::json!({ "code": 4100, "message": "Token expires" }));
        });
        let accepted = server.mock(|when, then| {
            when.method(GET)
                .path("/device/group")
                .header("x-user-authorization-v2", "Bearer at-new");
            then.status(200)
                .json_body(serde_json::json!({ "groupCount": 0, "groupList": [] }));
        });

        let mut client = client_with(&server, Box::new(FreshLoginAuthenticator));
        assert!(client.get_groups().is_err());
        let response = client.get_groups().expect("second call uses fresh token");
        assert!(response.group_list.is_empty());
        rejected.assert();
        accepted.assert();
    }

    #[test]
    fn unexpected_response_shape_reports_the_path() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/device/group");
            then.status(200).json_body(serde_json::json!({
                "groupCount": "not-a-number",
                "groupList": []
            }));
        });

        let err = client_for(&server).get_groups().expect_err("shape mismatch");
        match err {
            ApiError::Communication(msg) => assert!(msg.contains("groupCount")),
            other => panic!("unexpected error kind: {:?}", other),
        }
    }
}
