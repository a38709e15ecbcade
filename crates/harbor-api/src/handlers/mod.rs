mod common;
mod misc;
mod sessions;
mod ships;
mod terminal;

pub use misc::{health, stat, stat_overview};
pub use sessions::{
    annotate, delete_session, extend_ttl as session_extend_ttl, get_session, history, history_entry,
    history_last, list_sessions, ship_sessions,
};
pub use ships::{
    create_ship, delete_ship, delete_ship_permanent, download, exec, extend_ttl as ship_extend_ttl, get_ship,
    list_ships, logs, start, upload,
};
pub use terminal::term;
