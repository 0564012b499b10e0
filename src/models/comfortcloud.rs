//! Wire DTOs for the Comfort Cloud API and the Auth0 identity provider.
//!
//! Scope: types only — request building and envelope handling live in
//! `crate::client` and `crate::auth`.
//!
//! Notes
//! - Inbound fields are all `Option` because the service delivers partial
//!   objects: the group listing carries identity fields only, the per-device
//!   status call carries capabilities and parameters.
//! - `ParametersDto` skips `None` on serialization; the capability gating in
//!   the model layer works by leaving unsupported fields unset.

use serde::{Deserialize, Serialize};

// =====================
// Device group listing + device detail
// =====================

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GetGroupsResponse {
    pub group_count: Option<i64>,
    #[serde(default)]
    pub group_list: Vec<GroupDto>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupDto {
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    #[serde(default)]
    pub device_list: Vec<DeviceDto>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDto {
    pub device_guid: Option<String>,
    pub device_type: Option<String>,
    pub device_name: Option<String>,
    pub device_module_number: Option<String>,
    pub device_hash_guid: Option<String>,
    pub permission: Option<i64>,
    pub summer_house: Option<i64>,

    // capability flags, only present on the per-device status response
    #[serde(rename = "iAutoX")]
    pub i_auto_x: Option<bool>,
    pub nanoe: Option<bool>,
    pub nanoe_stand_alone: Option<bool>,
    pub auto_mode: Option<bool>,
    pub heat_mode: Option<bool>,
    pub fan_mode: Option<bool>,
    pub dry_mode: Option<bool>,
    pub cool_mode: Option<bool>,
    pub eco_navi: Option<bool>,
    pub powerful_mode: Option<bool>,
    pub quiet_mode: Option<bool>,
    #[serde(rename = "airSwingLR")]
    pub air_swing_lr: Option<bool>,
    #[serde(rename = "autoSwingUD")]
    pub auto_swing_ud: Option<bool>,
    pub eco_function: Option<i64>,
    pub temperature_unit: Option<i64>,
    pub coordinable_flg: Option<bool>,
    pub paired_flg: Option<bool>,

    pub dry_temp_min: Option<i64>,
    pub dry_temp_max: Option<i64>,
    pub heat_temp_min: Option<i64>,
    pub heat_temp_max: Option<i64>,
    pub cool_temp_min: Option<i64>,
    pub cool_temp_max: Option<i64>,
    pub auto_temp_min: Option<i64>,
    pub auto_temp_max: Option<i64>,

    /// Epoch milliseconds of the last device report.
    pub timestamp: Option<i64>,

    pub parameters: Option<ParametersDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ParametersDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_mode: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_set: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inside_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_speed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eco_mode: Option<i64>,
    #[serde(rename = "airSwingUD", skip_serializing_if = "Option::is_none")]
    pub air_swing_ud: Option<i64>,
    #[serde(rename = "airSwingLR", skip_serializing_if = "Option::is_none")]
    pub air_swing_lr: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_auto_mode: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nanoe: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_nanoe: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eco_navi: Option<i64>,
    #[serde(rename = "iAuto", skip_serializing_if = "Option::is_none")]
    pub i_auto: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_quality: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_direction: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_setting_mode: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eco_function_data: Option<i64>,
}

/// Body of the device-properties-update call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDeviceParametersRequest {
    pub device_guid: String,
    pub parameters: ParametersDto,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SetDeviceParametersResponse {
    /// 0 means accepted; anything else comes with `error` text.
    #[serde(default)]
    pub code: i64,
    pub error: Option<String>,
}

// =====================
// Identity provider (Auth0)
// =====================

/// JSON body of the `/usernamepassword/login` step. Field names are fixed by
/// the identity provider, including the underscore-prefixed ones.
#[derive(Debug, Clone, Serialize)]
pub struct LoginFormRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub tenant: String,
    pub response_type: String,
    pub scope: String,
    pub audience: String,
    #[serde(rename = "_csrf")]
    pub csrf: String,
    pub state: String,
    #[serde(rename = "_intstate")]
    pub intstate: String,
    pub username: String,
    pub password: String,
    pub lang: String,
    pub connection: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub scope: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterClientResponse {
    pub client_id: String,
}

/// Error body shared by the vendor API and the client registration call.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ErrorEnvelope {
    pub code: Option<i64>,
    pub message: Option<String>,
}
