//! Per-account session: one API client plus the merged device model, with the
//! model behind a mutex so readers and the poll loop can share it.

use log::warn;
use std::sync::{Mutex, MutexGuard};

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::model::{Device, GroupModel, ParameterDelta};

pub struct AccountSession {
    client: ApiClient,
    model: Mutex<GroupModel>,
}

impl AccountSession {
    pub fn new(client: ApiClient) -> Self {
        AccountSession {
            client,
            model: Mutex::new(GroupModel::new()),
        }
    }

    fn lock_model(&self) -> MutexGuard<'_, GroupModel> {
        // A poisoned lock only means a panic elsewhere; the model itself is
        // still consistent, every mutation happens through merge or clear.
        self.model.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_model<R>(&self, f: impl FnOnce(&GroupModel) -> R) -> R {
        f(&self.lock_model())
    }

    /// One poll cycle: fetch the group listing, merge it, then optionally
    /// refresh every known device. A failed listing clears the model so no
    /// reader mistakes stale state for current state.
    pub fn poll_once(
        &mut self,
        refresh_devices: bool,
        notify: &mut dyn FnMut(&Device),
    ) -> Result<(), ApiError> {
        let groups = match self.client.get_groups() {
            Ok(groups) => groups,
            Err(e) => {
                self.lock_model().clear();
                return Err(e);
            }
        };

        let device_ids = {
            let mut model = self.lock_model();
            model.merge_group_list(&groups);
            model.device_ids()
        };

        if refresh_devices {
            for device_id in device_ids {
                match self.refresh_device(&device_id, notify) {
                    Ok(()) => {}
                    Err(e @ (ApiError::AppVersionOutdated { .. } | ApiError::Configuration(_))) => {
                        self.lock_model().clear();
                        return Err(e);
                    }
                    Err(e) => warn!("Skipping device {} this cycle: {}", device_id, e),
                }
            }
        }
        Ok(())
    }

    pub fn refresh_device(
        &mut self,
        device_id: &str,
        notify: &mut dyn FnMut(&Device),
    ) -> Result<(), ApiError> {
        let dto = self.client.get_device(device_id)?;
        let mut model = self.lock_model();
        match model.find_device_mut(device_id) {
            Some(device) => {
                device.merge_from_details(&dto);
                notify(device);
                Ok(())
            }
            None => Err(ApiError::Configuration(format!(
                "device {} is not part of this account",
                device_id
            ))),
        }
    }

    /// Validate and dispatch a command. The delta is applied to the in-memory
    /// parameters only after the service accepts it, so a rejected command
    /// leaves the model untouched.
    pub fn send_command(&mut self, device_id: &str, delta: &ParameterDelta) -> Result<(), ApiError> {
        if delta.is_empty() {
            return Err(ApiError::Configuration(format!(
                "empty command for device {}",
                device_id
            )));
        }
        let (device_guid, wire) = {
            let model = self.lock_model();
            let device = model.find_device(device_id).ok_or_else(|| {
                ApiError::Configuration(format!("device {} is not part of this account", device_id))
            })?;
            let wire = device
                .create_command(delta)
                .map_err(|e| ApiError::Configuration(e.to_string()))?;
            (device.device_id.clone(), wire)
        };

        let response = self.client.set_device_parameters(&device_guid, wire)?;
        if response.code != 0 {
            return Err(ApiError::Communication(format!(
                "device command rejected: code {}, {}",
                response.code,
                response.error.unwrap_or_default()
            )));
        }

        let mut model = self.lock_model();
        if let Some(device) = model.find_device_mut(device_id) {
            if let Err(e) = device.apply_optimistic(delta) {
                warn!("Accepted command could not be applied locally: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Authenticator, Token, TokenManager, store_token};
    use crate::model::{OperationMode, ParameterDelta};
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

    fn session_for(server: &MockServer) -> AccountSession {
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
        let tokens = TokenManager::new(Box::new(store), Box::new(PanicAuthenticator));
        let agent = ureq::AgentBuilder::new().redirects(0).build();
        AccountSession::new(ApiClient::new(agent, server.base_url(), "1.21.0", tokens))
    }

    fn single_device_listing() -> serde_json::Value {
        serde_json::json!({
            "groupCount": 1,
            "groupList": [{
                "groupId": "g-1",
                "groupName": "My House",
                "deviceList": [{
                    "deviceGuid": "CZ-TACG1+A1",
                    "deviceType": "1",
                    "deviceName": "Living room",
                    "deviceModuleNumber": "CZ-TACG1"
                }]
            }]
        })
    }

    fn device_detail_body() -> String {
        std::fs::read_to_string("tests/data/get_device_response_on.json").expect("fixture present")
    }

    #[test]
    fn poll_cycle_merges_and_notifies() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/device/group");
            then.status(200).json_body(single_device_listing());
        });
        server.mock(|when, then| {
            when.method(GET).path_contains("/deviceStatus/");
            then.status(200)
                .header("Content-Type", "application/json")
                .body(device_detail_body());
        });

        let mut session = session_for(&server);
        let mut notified = Vec::new();
        session
            .poll_once(true, &mut |device| notified.push(device.device_id.clone()))
            .expect("poll succeeds");

        assert_eq!(notified, vec!["CZ-TACG1+A1".to_string()]);
        session.with_model(|model| {
            let device = model.find_device("CZ-TACG1+A1").expect("device present");
            assert!(device.is_initialized());
            assert_eq!(device.parameters().and_then(|p| p.inside_temperature), Some(20.0));
        });
    }

    #[test]
    fn failed_listing_clears_the_model() {
        let server = MockServer::start();
        let mut listing = server.mock(|when, then| {
            when.method(GET).path("/device/group");
            then.status(200).json_body(single_device_listing());
        });

        let mut session = session_for(&server);
        session.poll_once(false, &mut |_| {}).expect("first poll succeeds");
        session.with_model(|model| assert_eq!(model.groups.len(), 1));

        listing.delete();
        server.mock(|when, then| {
            when.method(GET).path("/device/group");
            then.status(500).json_body(serde_json::json!({ "code": 5000, "message": "boom" }));
        });

        assert!(session.poll_once(false, &mut |_| {}).is_err());
        session.with_model(|model| {
            assert!(model.groups.is_empty());
            assert!(model.last_updated.is_none());
        });
    }

    #[test]
    fn accepted_command_is_applied_optimistically() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/device/group");
            then.status(200).json_body(single_device_listing());
        });
        server.mock(|when, then| {
            when.method(GET).path_contains("/deviceStatus/CZ");
            then.status(200)
                .header("Content-Type", "application/json")
                .body(device_detail_body());
        });
        let control = server.mock(|when, then| {
            when.method(POST)
                .path("/deviceStatus/control")
                .body_contains("\"temperatureSet\":22.5");
            then.status(200).json_body(serde_json::json!({ "code": 0 }));
        });

        let mut session = session_for(&server);
        session.poll_once(true, &mut |_| {}).expect("poll succeeds");

        let delta = ParameterDelta::new().target_temperature(22.5);
        session.send_command("CZ-TACG1+A1", &delta).expect("command accepted");

        control.assert();
        session.with_model(|model| {
            let parameters = model
                .find_device("CZ-TACG1+A1")
                .and_then(|d| d.parameters())
                .cloned()
                .expect("parameters present");
            assert_eq!(parameters.target_temperature, Some(22.5));
            assert_eq!(parameters.mode, Some(OperationMode::Heat));
        });
    }

    #[test]
    fn rejected_command_leaves_model_untouched() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/device/group");
            then.status(200).json_body(single_device_listing());
        });
        server.mock(|when, then| {
            when.method(GET).path_contains("/deviceStatus/CZ");
            then.status(200)
                .header("Content-Type", "application/json")
                .body(device_detail_body());
        });
        server.mock(|when, then| {
            when.method(POST).path("/deviceStatus/control");
            then.status(200)
                .json_body(serde_json::json!({ "code": 14, "error": "device offline" }));
        });

        let mut session = session_for(&server);
        session.poll_once(true, &mut |_| {}).expect("poll succeeds");

        let delta = ParameterDelta::new().target_temperature(22.5);
        let err = session.send_command("CZ-TACG1+A1", &delta).expect_err("command rejected");
        assert!(err.to_string().contains("14"));

        session.with_model(|model| {
            let parameters = model
                .find_device("CZ-TACG1+A1")
                .and_then(|d| d.parameters())
                .cloned()
                .expect("parameters present");
            assert_eq!(parameters.target_temperature, Some(21.0));
        });
    }

    #[test]
    fn invalid_delta_never_reaches_the_network() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/device/group");
            then.status(200).json_body(single_device_listing());
        });
        let control = server.mock(|when, then| {
            when.method(POST).path("/deviceStatus/control");
            then.status(200).json_body(serde_json::json!({ "code": 0 }));
        });

        let mut session = session_for(&server);
        session.poll_once(false, &mut |_| {}).expect("poll succeeds");

        // device never got a detail response, commands must be rejected locally
        let delta = ParameterDelta::new().master_switch(true);
        let err = session.send_command("CZ-TACG1+A1", &delta).expect_err("rejected");
        assert!(matches!(err, ApiError::Configuration(_)));
        control.assert_hits(0);
    }
}
