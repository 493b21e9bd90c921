//! Request and status codes for the broker protocol.
//!
//! Every exchange between a plugin and the host goes through the broker
//! function with a request code; the broker answers with a status code.

/// Fetch the application directory as an owned C string.
pub const GET_APPDIRECTORY: u16 = 1;
/// Fetch the host plugin API version as an owned C string.
pub const GET_PLUGINAPI: u16 = 2;
/// Fetch the number of known plugins as an owned `usize`.
pub const GET_PLUGINSCOUNT: u16 = 3;
/// Fetch an owned `PluginInfo` for `*data` (a plugin name) or the sender.
pub const GET_PLUGININFO: u16 = 4;
/// Fetch the version string of `*data` (a plugin name) or the sender.
pub const GET_PLUGINVERSION: u16 = 5;
/// Ask whether `*data` names a known plugin. No allocation.
pub const CHECK_PLUGIN: u16 = 6;
/// Ask whether `*data` names a currently loaded plugin. No allocation.
pub const CHECK_PLUGINLOADED: u16 = 7;
/// Return an allocation previously handed out by the host. `*data` is the
/// pointer to release; the host frees it with the matching deallocator.
pub const FREE_RESULT: u16 = 8;

/// First code available for plugin-defined peer requests.
pub const USER_BASE: u16 = 0x1000;

/// Status codes returned by the broker and by plugin request handlers.
pub mod status {
    pub const SUCCESS: u16 = 0;
    pub const RESULT_TRUE: u16 = 1;
    pub const RESULT_FALSE: u16 = 2;
    /// The named plugin (or handed-back allocation) is unknown.
    pub const NOT_FOUND: u16 = 3;
    /// The caller passed a null `data`/`data_size`; every request exchanges
    /// data through those pointers.
    pub const DATASIZE_NULL: u16 = 4;
    pub const UNKNOWN_REQUEST: u16 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_codes_are_distinct() {
        let all = [
            GET_APPDIRECTORY,
            GET_PLUGINAPI,
            GET_PLUGINSCOUNT,
            GET_PLUGININFO,
            GET_PLUGINVERSION,
            CHECK_PLUGIN,
            CHECK_PLUGINLOADED,
            FREE_RESULT,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn user_base_leaves_room_for_host_codes() {
        assert!(USER_BASE > FREE_RESULT);
    }

    #[test]
    fn success_is_zero() {
        assert_eq!(status::SUCCESS, 0);
    }
}
