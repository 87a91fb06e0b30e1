//! Well-known appliance API paths.

pub const LOGIN_SESSIONS: &str = "/rest/login-sessions";
pub const STARTUP_PROGRESS: &str = "/rest/appliance/progress";
pub const EULA_STATUS: &str = "/rest/appliance/eula/status";
pub const EULA_SAVE: &str = "/rest/appliance/eula/save";
pub const CHANGE_PASSWORD: &str = "/rest/users/changePassword";
pub const NETWORK_INTERFACES: &str = "/rest/appliance/network-interfaces";

pub const SERVER_HARDWARE: &str = "/rest/server-hardware";
pub const SERVER_HARDWARE_TYPES: &str = "/rest/server-hardware-types";
pub const SERVER_PROFILES: &str = "/rest/server-profiles";
pub const SERVER_PROFILE_TEMPLATES: &str = "/rest/server-profile-templates";
pub const FIRMWARE_DRIVERS: &str = "/rest/firmware-drivers";

/// Suffix of the template endpoint that returns a profile skeleton.
pub const NEW_PROFILE_SUFFIX: &str = "/new-profile";

/// Suffix of the hardware endpoint that changes power state.
pub const POWER_STATE_SUFFIX: &str = "/powerState";
