//! Screen controllers: the state each view shows and the backend calls it
//! makes. Network work is split into `fetch_*`/`submit_*` associated
//! functions and `apply_*` methods, so a UI can run the former on a runtime
//! thread and the latter on its own.

pub mod contacts;
pub mod group;
pub mod private;

pub use contacts::ContactList;
pub use group::GroupChat;
pub use private::PrivateChat;
