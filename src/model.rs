//! In-memory device model: groups, devices, capabilities and operating
//! parameters, merged from two partial server responses.
//!
//! The group listing supplies identity fields only; a device stays
//! `Discovered` until the per-device status call delivers capabilities and
//! parameters and flips it to `Active`. Commands are described as a
//! `ParameterDelta`, validated against the device's `FeatureSet`, serialized
//! from a working copy, and applied optimistically to the live parameters so
//! readers see the new value before the next poll confirms it.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeSet;

use crate::models::comfortcloud::{DeviceDto, GetGroupsResponse, GroupDto, ParametersDto};

/// `deviceType` of first-generation wifi dongles, known to report sentinel
/// temperatures when the unit is off.
pub const DEVICE_TYPE_WIFI_DONGLE: &str = "1";
pub const DEVICE_TYPE_WIFI_BUILTIN: &str = "3";

// =====================
// Vendor value enums
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationMode {
    Auto,
    Dry,
    Cool,
    Heat,
    Fan,
}

impl OperationMode {
    pub fn value(self) -> i64 {
        match self {
            OperationMode::Auto => 0,
            OperationMode::Dry => 1,
            OperationMode::Cool => 2,
            OperationMode::Heat => 3,
            OperationMode::Fan => 4,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(OperationMode::Auto),
            1 => Some(OperationMode::Dry),
            2 => Some(OperationMode::Cool),
            3 => Some(OperationMode::Heat),
            4 => Some(OperationMode::Fan),
            _ => None,
        }
    }

    /// Target temperature is only meaningful in these modes.
    pub fn supports_target_temperature(self) -> bool {
        matches!(self, OperationMode::Auto | OperationMode::Cool | OperationMode::Heat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FanSpeed {
    Auto,
    Low,
    LowMiddle,
    Middle,
    HighMiddle,
    High,
}

impl FanSpeed {
    pub fn value(self) -> i64 {
        match self {
            FanSpeed::Auto => 0,
            FanSpeed::Low => 1,
            FanSpeed::LowMiddle => 2,
            FanSpeed::Middle => 3,
            FanSpeed::HighMiddle => 4,
            FanSpeed::High => 5,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(FanSpeed::Auto),
            1 => Some(FanSpeed::Low),
            2 => Some(FanSpeed::LowMiddle),
            3 => Some(FanSpeed::Middle),
            4 => Some(FanSpeed::HighMiddle),
            5 => Some(FanSpeed::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EcoMode {
    Auto,
    Powerful,
    Quiet,
}

impl EcoMode {
    pub fn value(self) -> i64 {
        match self {
            EcoMode::Auto => 0,
            EcoMode::Powerful => 1,
            EcoMode::Quiet => 2,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(EcoMode::Auto),
            1 => Some(EcoMode::Powerful),
            2 => Some(EcoMode::Quiet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AirSwingUpDown {
    Auto,
    Top,
    TopMiddle,
    Middle,
    MiddleBottom,
    Bottom,
    All,
}

impl AirSwingUpDown {
    pub fn value(self) -> i64 {
        match self {
            AirSwingUpDown::Auto => -1,
            AirSwingUpDown::Top => 0,
            AirSwingUpDown::TopMiddle => 3,
            AirSwingUpDown::Middle => 2,
            AirSwingUpDown::MiddleBottom => 4,
            AirSwingUpDown::Bottom => 1,
            AirSwingUpDown::All => 5,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            -1 => Some(AirSwingUpDown::Auto),
            0 => Some(AirSwingUpDown::Top),
            3 => Some(AirSwingUpDown::TopMiddle),
            2 => Some(AirSwingUpDown::Middle),
            4 => Some(AirSwingUpDown::MiddleBottom),
            1 => Some(AirSwingUpDown::Bottom),
            5 => Some(AirSwingUpDown::All),
            _ => None,
        }
    }

    pub fn all() -> [AirSwingUpDown; 7] {
        [
            AirSwingUpDown::Auto,
            AirSwingUpDown::Top,
            AirSwingUpDown::TopMiddle,
            AirSwingUpDown::Middle,
            AirSwingUpDown::MiddleBottom,
            AirSwingUpDown::Bottom,
            AirSwingUpDown::All,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AirSwingSideways {
    Auto,
    Left,
    LeftCenter,
    Center,
    RightCenter,
    Right,
}

impl AirSwingSideways {
    pub fn value(self) -> i64 {
        match self {
            AirSwingSideways::Auto => -1,
            AirSwingSideways::Left => 0,
            AirSwingSideways::LeftCenter => 4,
            AirSwingSideways::Center => 2,
            AirSwingSideways::RightCenter => 3,
            AirSwingSideways::Right => 1,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            -1 => Some(AirSwingSideways::Auto),
            0 => Some(AirSwingSideways::Left),
            4 => Some(AirSwingSideways::LeftCenter),
            2 => Some(AirSwingSideways::Center),
            3 => Some(AirSwingSideways::RightCenter),
            1 => Some(AirSwingSideways::Right),
            _ => None,
        }
    }

    pub fn all() -> [AirSwingSideways; 6] {
        [
            AirSwingSideways::Auto,
            AirSwingSideways::Left,
            AirSwingSideways::LeftCenter,
            AirSwingSideways::Center,
            AirSwingSideways::RightCenter,
            AirSwingSideways::Right,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AirSwingAutoMode {
    Auto,
    Disabled,
    UpDown,
    LeftRight,
}

impl AirSwingAutoMode {
    pub fn value(self) -> i64 {
        match self {
            AirSwingAutoMode::Auto => 0,
            AirSwingAutoMode::Disabled => 1,
            AirSwingAutoMode::UpDown => 2,
            AirSwingAutoMode::LeftRight => 3,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(AirSwingAutoMode::Auto),
            1 => Some(AirSwingAutoMode::Disabled),
            2 => Some(AirSwingAutoMode::UpDown),
            3 => Some(AirSwingAutoMode::LeftRight),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NanoeMode {
    Unavailable,
    Off,
    On,
    ModeG,
    All,
}

impl NanoeMode {
    pub fn value(self) -> i64 {
        match self {
            NanoeMode::Unavailable => 0,
            NanoeMode::Off => 1,
            NanoeMode::On => 2,
            NanoeMode::ModeG => 3,
            NanoeMode::All => 4,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(NanoeMode::Unavailable),
            1 => Some(NanoeMode::Off),
            2 => Some(NanoeMode::On),
            3 => Some(NanoeMode::ModeG),
            4 => Some(NanoeMode::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

// =====================
// FeatureSet
// =====================

/// Capabilities of one device model, computed once from the device detail
/// response and consulted before every outgoing command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeatureSet {
    pub i_auto_x: bool,
    pub nanoe: bool,
    pub nanoe_stand_alone: bool,
    pub eco_navi: bool,
    pub eco_function: i64,
    pub supported_operation_modes: BTreeSet<OperationMode>,
    pub supported_eco_modes: BTreeSet<EcoMode>,
    pub supported_swing_sideways: BTreeSet<AirSwingSideways>,
    pub supported_swing_up_down: BTreeSet<AirSwingUpDown>,
}

impl FeatureSet {
    pub fn from_device(dto: &DeviceDto) -> FeatureSet {
        let mut supported_operation_modes = BTreeSet::new();
        if dto.fan_mode == Some(true) {
            supported_operation_modes.insert(OperationMode::Fan);
        }
        if dto.dry_mode == Some(true) {
            supported_operation_modes.insert(OperationMode::Dry);
        }
        if dto.auto_mode == Some(true) {
            supported_operation_modes.insert(OperationMode::Auto);
        }
        if dto.cool_mode == Some(true) {
            supported_operation_modes.insert(OperationMode::Cool);
        }
        if dto.heat_mode == Some(true) {
            supported_operation_modes.insert(OperationMode::Heat);
        }

        let mut supported_eco_modes = BTreeSet::new();
        supported_eco_modes.insert(EcoMode::Auto);
        if dto.powerful_mode == Some(true) {
            supported_eco_modes.insert(EcoMode::Powerful);
        }
        if dto.quiet_mode == Some(true) {
            supported_eco_modes.insert(EcoMode::Quiet);
        }

        // The two swing capability flags arrive switched on the wire:
        // autoSwingUD actually describes the sideways axis and airSwingLR the
        // up/down axis.
        let mut supported_swing_sideways = BTreeSet::new();
        if dto.auto_swing_ud == Some(true) {
            supported_swing_sideways.extend(AirSwingSideways::all());
        }
        let mut supported_swing_up_down = BTreeSet::new();
        if dto.air_swing_lr == Some(true) {
            supported_swing_up_down.extend(AirSwingUpDown::all());
        }

        FeatureSet {
            i_auto_x: dto.i_auto_x == Some(true),
            nanoe: dto.nanoe == Some(true),
            nanoe_stand_alone: dto.nanoe_stand_alone == Some(true),
            eco_navi: dto.eco_navi == Some(true),
            eco_function: dto.eco_function.unwrap_or(0),
            supported_operation_modes,
            supported_eco_modes,
            supported_swing_sideways,
            supported_swing_up_down,
        }
    }
}

// =====================
// Parameters
// =====================

/// Operating state of a device. Inbound values outside plausible physical
/// ranges are vendor sentinels for "not applicable" and parse to `None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameters {
    pub mode: Option<OperationMode>,
    pub master_switch: bool,
    pub target_temperature: Option<f64>,
    pub inside_temperature: Option<f64>,
    pub outside_temperature: Option<f64>,
    pub fan_speed: Option<FanSpeed>,
    pub eco_mode: Option<EcoMode>,
    pub swing_up_down: Option<AirSwingUpDown>,
    pub swing_sideways: Option<AirSwingSideways>,
    pub fan_auto_mode: Option<AirSwingAutoMode>,
    pub nanoe_mode: Option<NanoeMode>,
    pub actual_nanoe_mode: Option<NanoeMode>,
    pub eco_navi: Option<i64>,
    pub i_auto: Option<i64>,
    pub air_quality: Option<i64>,
    pub air_direction: Option<i64>,
    pub last_setting_mode: Option<i64>,
    pub eco_function_data: Option<i64>,
}

impl Parameters {
    pub fn from_wire(dto: &ParametersDto) -> Parameters {
        Parameters {
            mode: dto.operation_mode.and_then(OperationMode::from_value),
            master_switch: dto.operate.is_some_and(|v| v != 0),
            target_temperature: dto.temperature_set.filter(|t| *t > 0.0 && *t < 120.0),
            inside_temperature: dto.inside_temperature.filter(|t| *t > -50.0 && *t < 120.0),
            outside_temperature: dto.out_temperature.filter(|t| *t > -50.0 && *t < 120.0),
            fan_speed: dto.fan_speed.and_then(FanSpeed::from_value),
            eco_mode: dto.eco_mode.and_then(EcoMode::from_value),
            swing_up_down: dto.air_swing_ud.and_then(AirSwingUpDown::from_value),
            swing_sideways: dto.air_swing_lr.and_then(AirSwingSideways::from_value),
            fan_auto_mode: dto.fan_auto_mode.and_then(AirSwingAutoMode::from_value),
            nanoe_mode: dto.nanoe.and_then(NanoeMode::from_value),
            actual_nanoe_mode: dto.actual_nanoe.and_then(NanoeMode::from_value),
            eco_navi: dto.eco_navi,
            i_auto: dto.i_auto,
            air_quality: dto.air_quality,
            air_direction: dto.air_direction,
            last_setting_mode: dto.last_setting_mode,
            eco_function_data: dto.eco_function_data,
        }
    }

    /// Seed for an outgoing command: current mode and master switch only, the
    /// rest stays unset unless the delta provides it.
    pub fn for_command(current: &Parameters) -> Parameters {
        Parameters {
            mode: current.mode,
            master_switch: current.master_switch,
            ..Parameters::default()
        }
    }

    /// Convert to the wire format. Fields whose capability the device lacks
    /// are left unset and vanish from the serialized payload; the operating
    /// mode and master switch are always included.
    pub fn to_wire(&self, features: &FeatureSet) -> ParametersDto {
        let mut dto = ParametersDto::default();
        if !features.supported_swing_up_down.is_empty() {
            dto.air_swing_ud = self.swing_up_down.map(AirSwingUpDown::value);
        }
        if !features.supported_swing_sideways.is_empty() {
            dto.air_swing_lr = self.swing_sideways.map(AirSwingSideways::value);
        }
        dto.operation_mode = self.mode.map(OperationMode::value);
        dto.operate = Some(if self.master_switch { 1 } else { 0 });
        dto.temperature_set = self.target_temperature;
        dto.eco_mode = self.eco_mode.map(EcoMode::value);
        dto.fan_auto_mode = self.fan_auto_mode.map(AirSwingAutoMode::value);
        dto.fan_speed = self.fan_speed.map(FanSpeed::value);
        dto.nanoe = self.nanoe_mode.map(NanoeMode::value);
        dto.actual_nanoe = self.actual_nanoe_mode.map(NanoeMode::value);
        if features.eco_navi {
            dto.eco_navi = self.eco_navi;
        }
        if features.i_auto_x {
            dto.i_auto = self.i_auto;
        }
        dto.air_direction = self.air_direction;
        dto
    }
}

// =====================
// Command delta
// =====================

/// Requested changes to a device's parameters. Built by the caller, validated
/// against the device's `FeatureSet`, then applied both to the outgoing
/// working copy and (optimistically) to the live parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterDelta {
    pub mode: Option<OperationMode>,
    pub master_switch: Option<bool>,
    pub target_temperature: Option<f64>,
    pub fan_speed: Option<FanSpeed>,
    pub eco_mode: Option<EcoMode>,
    pub swing_up_down: Option<AirSwingUpDown>,
    pub swing_sideways: Option<AirSwingSideways>,
    pub fan_auto_mode: Option<AirSwingAutoMode>,
    pub nanoe_mode: Option<NanoeMode>,
}

impl ParameterDelta {
    pub fn new() -> ParameterDelta {
        ParameterDelta::default()
    }

    pub fn mode(mut self, mode: OperationMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn master_switch(mut self, on: bool) -> Self {
        self.master_switch = Some(on);
        self
    }

    pub fn target_temperature(mut self, temperature: f64) -> Self {
        self.target_temperature = Some(temperature);
        self
    }

    pub fn fan_speed(mut self, fan_speed: FanSpeed) -> Self {
        self.fan_speed = Some(fan_speed);
        self
    }

    pub fn eco_mode(mut self, eco_mode: EcoMode) -> Self {
        self.eco_mode = Some(eco_mode);
        self
    }

    pub fn swing_up_down(mut self, swing: AirSwingUpDown) -> Self {
        self.swing_up_down = Some(swing);
        self
    }

    pub fn swing_sideways(mut self, swing: AirSwingSideways) -> Self {
        self.swing_sideways = Some(swing);
        self
    }

    pub fn fan_auto_mode(mut self, fan_auto_mode: AirSwingAutoMode) -> Self {
        self.fan_auto_mode = Some(fan_auto_mode);
        self
    }

    pub fn nanoe_mode(mut self, nanoe_mode: NanoeMode) -> Self {
        self.nanoe_mode = Some(nanoe_mode);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == ParameterDelta::default()
    }

    pub fn apply_to(&self, parameters: &mut Parameters) {
        if let Some(mode) = self.mode {
            parameters.mode = Some(mode);
        }
        if let Some(on) = self.master_switch {
            parameters.master_switch = on;
        }
        if let Some(temperature) = self.target_temperature {
            parameters.target_temperature = Some(temperature);
        }
        if let Some(fan_speed) = self.fan_speed {
            parameters.fan_speed = Some(fan_speed);
        }
        if let Some(eco_mode) = self.eco_mode {
            parameters.eco_mode = Some(eco_mode);
        }
        if let Some(swing) = self.swing_up_down {
            parameters.swing_up_down = Some(swing);
        }
        if let Some(swing) = self.swing_sideways {
            parameters.swing_sideways = Some(swing);
        }
        if let Some(fan_auto_mode) = self.fan_auto_mode {
            parameters.fan_auto_mode = Some(fan_auto_mode);
        }
        if let Some(nanoe_mode) = self.nanoe_mode {
            parameters.nanoe_mode = Some(nanoe_mode);
        }
    }
}

#[derive(Debug)]
pub enum CommandError {
    /// Device was seen in the group listing but its detail response has not
    /// arrived yet.
    NotInitialized(String),
    Unsupported { device_id: String, detail: String },
}

impl core::fmt::Display for CommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CommandError::NotInitialized(id) => {
                write!(f, "device {} is not initialized yet, no detail response received", id)
            }
            CommandError::Unsupported { device_id, detail } => {
                write!(f, "device {} rejected command: {}", device_id, detail)
            }
        }
    }
}

impl std::error::Error for CommandError {}

// =====================
// Device / Group / GroupModel
// =====================

/// Capabilities and operating state, present once the device detail response
/// has been merged.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveState {
    pub permission: Option<i64>,
    pub summerhouse: Option<i64>,
    pub temperature_unit: TemperatureUnit,
    pub feature_set: FeatureSet,
    pub parameters: Parameters,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceState {
    /// Seen in a group listing only; identity fields are known, parameters
    /// and capabilities are not.
    Discovered,
    Active(Box<ActiveState>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub device_id: String,
    pub device_type: Option<String>,
    pub name: Option<String>,
    pub model: Option<String>,
    /// Copies of the owning group's identity, for display only.
    pub group_id: String,
    pub group_name: Option<String>,
    pub state: DeviceState,
}

impl Device {
    fn new(device_id: &str, group_id: &str, group_name: Option<&str>) -> Device {
        Device {
            device_id: device_id.to_string(),
            device_type: None,
            name: None,
            model: None,
            group_id: group_id.to_string(),
            group_name: group_name.map(|n| n.to_string()),
            state: DeviceState::Discovered,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, DeviceState::Active(_))
    }

    pub fn parameters(&self) -> Option<&Parameters> {
        match &self.state {
            DeviceState::Active(active) => Some(&active.parameters),
            DeviceState::Discovered => None,
        }
    }

    pub fn feature_set(&self) -> Option<&FeatureSet> {
        match &self.state {
            DeviceState::Active(active) => Some(&active.feature_set),
            DeviceState::Discovered => None,
        }
    }

    /// Identity fields from the lightweight group listing. Never touches
    /// parameters or capabilities.
    pub fn merge_from_group_list(&mut self, dto: &DeviceDto) {
        if let Some(device_type) = &dto.device_type {
            self.device_type = Some(device_type.clone());
        }
        if let Some(name) = &dto.device_name {
            self.name = Some(name.clone());
        }
        if let Some(model) = &dto.device_module_number {
            self.model = Some(model.clone());
        }
    }

    /// Full state from the per-device status response; flips the device to
    /// `Active`. The current parameters are replaced wholesale — this is the
    /// only path that overwrites optimistic values with server truth.
    pub fn merge_from_details(&mut self, dto: &DeviceDto) {
        let Some(parameters_dto) = &dto.parameters else {
            log::warn!("Device {} detail response carried no parameters, keeping previous state", self.device_id);
            return;
        };
        let feature_set = FeatureSet::from_device(dto);
        let parameters = Parameters::from_wire(parameters_dto);
        let temperature_unit = if dto.temperature_unit.unwrap_or(0) == 0 {
            TemperatureUnit::Celsius
        } else {
            TemperatureUnit::Fahrenheit
        };
        let last_updated = dto.timestamp.and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        self.state = DeviceState::Active(Box::new(ActiveState {
            permission: dto.permission,
            summerhouse: dto.summer_house,
            temperature_unit,
            feature_set,
            parameters,
            last_updated,
        }));
    }

    fn validate(&self, delta: &ParameterDelta, active: &ActiveState) -> Result<(), CommandError> {
        let features = &active.feature_set;
        let unsupported = |detail: String| CommandError::Unsupported {
            device_id: self.device_id.clone(),
            detail,
        };

        if let Some(mode) = delta.mode {
            if !features.supported_operation_modes.contains(&mode) {
                return Err(unsupported(format!(
                    "operation mode {:?} not in supported set {:?}",
                    mode, features.supported_operation_modes
                )));
            }
        }
        if let Some(eco_mode) = delta.eco_mode {
            if !features.supported_eco_modes.contains(&eco_mode) {
                return Err(unsupported(format!(
                    "eco mode {:?} not in supported set {:?}",
                    eco_mode, features.supported_eco_modes
                )));
            }
        }
        if let Some(swing) = delta.swing_up_down {
            if !features.supported_swing_up_down.contains(&swing) {
                return Err(unsupported(format!("vertical swing {:?} not supported", swing)));
            }
        }
        if let Some(swing) = delta.swing_sideways {
            if !features.supported_swing_sideways.contains(&swing) {
                return Err(unsupported(format!("horizontal swing {:?} not supported", swing)));
            }
        }
        if delta.nanoe_mode.is_some() && !features.nanoe_stand_alone {
            return Err(unsupported("nanoe is not individually controllable".to_string()));
        }
        if delta.target_temperature.is_some() {
            let effective_mode = delta.mode.or(active.parameters.mode);
            match effective_mode {
                Some(mode) if mode.supports_target_temperature() => {}
                Some(mode) => {
                    return Err(unsupported(format!(
                        "target temperature cannot be set in mode {:?}, switch to AUTO, COOL or HEAT first",
                        mode
                    )));
                }
                None => {
                    return Err(unsupported("operating mode unknown, refusing temperature command".to_string()));
                }
            }
        }
        Ok(())
    }

    /// Validate a delta and build the outgoing wire payload from a working
    /// copy seeded with the current mode and master switch.
    pub fn create_command(&self, delta: &ParameterDelta) -> Result<ParametersDto, CommandError> {
        let DeviceState::Active(active) = &self.state else {
            return Err(CommandError::NotInitialized(self.device_id.clone()));
        };
        self.validate(delta, active)?;
        let mut outgoing = Parameters::for_command(&active.parameters);
        delta.apply_to(&mut outgoing);
        Ok(outgoing.to_wire(&active.feature_set))
    }

    /// Apply the delta to the live parameters so readers observe the new
    /// values immediately; the next detail fetch replaces them with server
    /// truth.
    pub fn apply_optimistic(&mut self, delta: &ParameterDelta) -> Result<(), CommandError> {
        let DeviceState::Active(active) = &mut self.state else {
            return Err(CommandError::NotInitialized(self.device_id.clone()));
        };
        delta.apply_to(&mut active.parameters);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub id: String,
    pub name: Option<String>,
    pub devices: Vec<Device>,
}

impl Group {
    fn merge_from(&mut self, dto: &GroupDto) {
        if let Some(name) = &dto.group_name {
            self.name = Some(name.clone());
        }
    }
}

/// Root aggregate for one account. Cleared wholesale when a poll fails so
/// consumers never see stale operating state presented as current.
#[derive(Debug, Default)]
pub struct GroupModel {
    pub groups: Vec<Group>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl GroupModel {
    pub fn new() -> GroupModel {
        GroupModel::default()
    }

    /// Merge a group listing. Groups and devices are looked up by id, so
    /// repeated polls with the same payload never duplicate entries.
    pub fn merge_group_list(&mut self, response: &GetGroupsResponse) {
        for group_dto in &response.group_list {
            let Some(group_id) = group_dto.group_id.as_deref() else {
                log::warn!("Skipping group without groupId in listing");
                continue;
            };
            let group = match self.groups.iter_mut().position(|g| g.id == group_id) {
                Some(pos) => &mut self.groups[pos],
                None => {
                    self.groups.push(Group {
                        id: group_id.to_string(),
                        name: None,
                        devices: Vec::new(),
                    });
                    let last = self.groups.len() - 1;
                    &mut self.groups[last]
                }
            };
            group.merge_from(group_dto);
            let group_name = group.name.clone();

            for device_dto in &group_dto.device_list {
                let Some(device_guid) = device_dto.device_guid.as_deref() else {
                    log::warn!("Skipping device without deviceGuid in group {}", group_id);
                    continue;
                };
                let device = match group.devices.iter_mut().position(|d| d.device_id == device_guid) {
                    Some(pos) => &mut group.devices[pos],
                    None => {
                        group.devices.push(Device::new(device_guid, group_id, group_name.as_deref()));
                        let last = group.devices.len() - 1;
                        &mut group.devices[last]
                    }
                };
                device.merge_from_group_list(device_dto);
            }
        }
        self.last_updated = Some(Utc::now());
    }

    pub fn find_device(&self, device_id: &str) -> Option<&Device> {
        self.groups
            .iter()
            .flat_map(|g| g.devices.iter())
            .find(|d| d.device_id == device_id)
    }

    pub fn find_device_mut(&mut self, device_id: &str) -> Option<&mut Device> {
        self.groups
            .iter_mut()
            .flat_map(|g| g.devices.iter_mut())
            .find(|d| d.device_id == device_id)
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|g| g.devices.iter())
            .map(|d| d.device_id.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.last_updated = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_groups_fixture() -> GetGroupsResponse {
        let json = std::fs::read_to_string("tests/data/get_groups_response.json").expect("fixture present");
        serde_json::from_str(&json).expect("parse group listing")
    }

    fn load_device_fixture(name: &str) -> DeviceDto {
        let json = std::fs::read_to_string(format!("tests/data/{}", name)).expect("fixture present");
        serde_json::from_str(&json).expect("parse device detail")
    }

    fn active_device() -> Device {
        let mut device = Device::new("CZ-TACG1+A1", "g-1", Some("My House"));
        device.merge_from_details(&load_device_fixture("get_device_response_on.json"));
        device
    }

    #[test]
    fn merge_is_idempotent() {
        let mut model = GroupModel::new();
        let listing = load_groups_fixture();
        model.merge_group_list(&listing);
        model.merge_group_list(&listing);
        assert_eq!(model.groups.len(), 1);
        assert_eq!(model.groups[0].devices.len(), 3);
        assert!(model.last_updated.is_some());
    }

    #[test]
    fn listing_merge_leaves_devices_uninitialized() {
        let mut model = GroupModel::new();
        model.merge_group_list(&load_groups_fixture());
        let device = model.find_device("CZ-TACG1+A1").expect("device present");
        assert!(!device.is_initialized());
        assert!(device.parameters().is_none());
        assert_eq!(device.name.as_deref(), Some("Living room"));
        assert_eq!(device.group_name.as_deref(), Some("My House"));
    }

    #[test]
    fn detail_merge_activates_device() {
        let device = active_device();
        assert!(device.is_initialized());
        let parameters = device.parameters().expect("parameters present");
        assert!(parameters.master_switch);
        assert_eq!(parameters.inside_temperature, Some(20.0));
        assert_eq!(parameters.mode, Some(OperationMode::Heat));
        let features = device.feature_set().expect("features present");
        assert!(features.supported_operation_modes.contains(&OperationMode::Heat));
        assert!(!features.supported_swing_sideways.is_empty());
    }

    #[test]
    fn sentinel_temperatures_parse_as_absent() {
        let device_dto = load_device_fixture("get_device_response_wifi_dongle_off.json");
        let mut device = Device::new("dongle-1", "g-1", None);
        device.device_type = Some(DEVICE_TYPE_WIFI_DONGLE.to_string());
        device.merge_from_details(&device_dto);
        let parameters = device.parameters().expect("parameters present");
        assert_eq!(parameters.inside_temperature, None);
        assert_eq!(parameters.outside_temperature, None);
        assert_eq!(parameters.target_temperature, None);
        assert!(!parameters.master_switch);
    }

    #[test]
    fn sentinel_boundaries() {
        let dto = ParametersDto {
            temperature_set: Some(0.0),
            inside_temperature: Some(-50.0),
            out_temperature: Some(120.0),
            ..Default::default()
        };
        let parameters = Parameters::from_wire(&dto);
        assert_eq!(parameters.target_temperature, None);
        assert_eq!(parameters.inside_temperature, None);
        assert_eq!(parameters.outside_temperature, None);

        let dto = ParametersDto {
            temperature_set: Some(21.0),
            inside_temperature: Some(-49.0),
            out_temperature: Some(119.0),
            ..Default::default()
        };
        let parameters = Parameters::from_wire(&dto);
        assert_eq!(parameters.target_temperature, Some(21.0));
        assert_eq!(parameters.inside_temperature, Some(-49.0));
        assert_eq!(parameters.outside_temperature, Some(119.0));
    }

    #[test]
    fn command_round_trip_sets_operate_and_temperature() {
        let device = active_device();
        let delta = ParameterDelta::new().target_temperature(22.0);
        let dto = device.create_command(&delta).expect("command accepted");
        assert_eq!(dto.operate, Some(1));
        assert_eq!(dto.temperature_set, Some(22.0));
        assert_eq!(dto.operation_mode, Some(OperationMode::Heat.value()));
    }

    #[test]
    fn optimistic_apply_updates_live_parameters_immediately() {
        let mut device = active_device();
        let before = device.parameters().expect("parameters").target_temperature;
        assert_ne!(before, Some(25.5));

        let delta = ParameterDelta::new().target_temperature(25.5).fan_speed(FanSpeed::High);
        device.create_command(&delta).expect("command accepted");
        device.apply_optimistic(&delta).expect("applied");

        let parameters = device.parameters().expect("parameters");
        assert_eq!(parameters.target_temperature, Some(25.5));
        assert_eq!(parameters.fan_speed, Some(FanSpeed::High));
    }

    #[test]
    fn uninitialized_device_rejects_commands() {
        let mut device = Device::new("bare-1", "g-1", None);
        let delta = ParameterDelta::new().master_switch(true);
        assert!(matches!(device.create_command(&delta), Err(CommandError::NotInitialized(_))));
        assert!(matches!(device.apply_optimistic(&delta), Err(CommandError::NotInitialized(_))));
    }

    #[test]
    fn unsupported_eco_mode_is_rejected_before_send() {
        let mut dto = load_device_fixture("get_device_response_on.json");
        dto.powerful_mode = Some(false);
        let mut device = Device::new("d-1", "g-1", None);
        device.merge_from_details(&dto);

        let delta = ParameterDelta::new().eco_mode(EcoMode::Powerful);
        assert!(matches!(
            device.create_command(&delta),
            Err(CommandError::Unsupported { .. })
        ));
    }

    #[test]
    fn temperature_command_requires_compatible_mode() {
        let mut dto = load_device_fixture("get_device_response_on.json");
        if let Some(parameters) = dto.parameters.as_mut() {
            parameters.operation_mode = Some(OperationMode::Fan.value());
        }
        let mut device = Device::new("d-1", "g-1", None);
        device.merge_from_details(&dto);

        let delta = ParameterDelta::new().target_temperature(22.0);
        assert!(matches!(
            device.create_command(&delta),
            Err(CommandError::Unsupported { .. })
        ));

        // switching mode in the same delta makes it acceptable
        let delta = ParameterDelta::new().mode(OperationMode::Heat).target_temperature(22.0);
        assert!(device.create_command(&delta).is_ok());
    }

    #[test]
    fn swing_fields_omitted_without_swing_support() {
        let mut dto = load_device_fixture("get_device_response_on.json");
        dto.air_swing_lr = Some(false);
        dto.auto_swing_ud = Some(false);
        let mut device = Device::new("d-1", "g-1", None);
        device.merge_from_details(&dto);

        let wire = device
            .create_command(&ParameterDelta::new().master_switch(false))
            .expect("command accepted");
        assert_eq!(wire.air_swing_ud, None);
        assert_eq!(wire.air_swing_lr, None);
        assert_eq!(wire.operate, Some(0));
        assert!(wire.operation_mode.is_some());
    }
}
