pub mod coordinator;
pub mod error;
pub mod mirror;
pub mod projection;
pub mod remote;
pub mod types;

pub use coordinator::{MutationCoordinator, MutationTicket};
pub use error::{MutationError, RemoteError};
pub use mirror::LocalMirror;
pub use projection::{project, Filter, ParseViewError, SortOrder, ViewQuery};
pub use remote::{HttpRemoteStore, RemoteStore};
pub use types::{MutationEvent, MutationKind, PendingMutation};
