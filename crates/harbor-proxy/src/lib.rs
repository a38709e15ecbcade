mod error;
mod forward;
mod terminal;
mod url;

pub use error::ProxyError;
pub use forward::{ExecuteOutcome, Proxy};
pub use terminal::{
    admit, relay, ship_terminal_url, Admission, TerminalRequest, CLOSE_ACCESS_DENIED, CLOSE_SHIP_NOT_FOUND,
    CLOSE_UNAUTHORIZED, CLOSE_UPSTREAM_FAILURE,
};
pub use url::ship_url;
