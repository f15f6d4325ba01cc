// `debug!`, `info!`, `warn!` and `error!` for use inside the crate; see
// `observability` for how the backend is picked.

#[allow(unused_imports, reason = "each module pulls only the levels it logs at")]
pub(crate) use crate::observability::{
    log_debug as debug, log_error as error, log_info as info, log_warn as warn,
};
