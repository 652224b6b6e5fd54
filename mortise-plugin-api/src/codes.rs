//! Request and status codes for the manager request protocol.
//!
//! Codes travel across the plugin ABI as plain `u16` values so they stay
//! stable between host revisions. Status codes describe the outcome of a
//! request; request codes select the operation. Values below
//! [`USER_BASE`] are reserved for the host.

/// Request completed.
pub const SUCCESS: u16 = 0;
/// The receiver does not understand the request code.
pub const UNKNOWN_REQUEST: u16 = 1;
/// The `data_size` pointer was null on entry.
pub const DATASIZE_NULL: u16 = 2;
/// The named plugin is not known to the registry.
pub const NOT_FOUND: u16 = 3;
/// Boolean answer: yes.
pub const RESULT_TRUE: u16 = 4;
/// Boolean answer: no.
pub const RESULT_FALSE: u16 = 5;

/// Ask for the host executable's directory. Answer: owned C string.
pub const GET_APPDIRECTORY: u16 = 100;
/// Ask for the host plugin API version. Answer: owned C string.
pub const GET_PLUGINAPI: u16 = 101;
/// Ask how many plugins the registry holds. Answer: owned `usize`.
pub const GET_PLUGINSCOUNT: u16 = 102;
/// Ask for a plugin's full info record. Input: target name or null for
/// the sender itself. Answer: owned [`PluginInfo`](crate::PluginInfo).
pub const GET_PLUGININFO: u16 = 103;
/// Ask for a plugin's version. Input as for [`GET_PLUGININFO`].
/// Answer: owned C string.
pub const GET_PLUGINVERSION: u16 = 104;
/// Ask whether a plugin exists. Input: target name.
pub const CHECK_PLUGIN: u16 = 105;
/// Ask whether a plugin is currently loaded. Input: target name.
pub const CHECK_PLUGINLOADED: u16 = 106;

/// First code available for plugin-defined requests.
pub const USER_BASE: u16 = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_request_ranges_disjoint() {
        let statuses = [
            SUCCESS,
            UNKNOWN_REQUEST,
            DATASIZE_NULL,
            NOT_FOUND,
            RESULT_TRUE,
            RESULT_FALSE,
        ];
        let requests = [
            GET_APPDIRECTORY,
            GET_PLUGINAPI,
            GET_PLUGINSCOUNT,
            GET_PLUGININFO,
            GET_PLUGINVERSION,
            CHECK_PLUGIN,
            CHECK_PLUGINLOADED,
        ];
        for s in statuses {
            assert!(s < 100);
            for r in requests {
                assert_ne!(s, r);
                assert!(r < USER_BASE);
            }
        }
    }

    #[test]
    fn test_success_is_zero() {
        assert_eq!(SUCCESS, 0);
    }
}
