//! mockrelay: a mock resolution engine with a JSON control plane.
//!
//! Rules persist in hand-editable JSON files, a matcher picks the winning
//! rule per request, and six generator kinds turn the winner into a
//! response. Everything is driven over a newline-delimited JSON TCP
//! protocol; mutations fan the full rule set out to every connected client.

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod generate;
pub mod ledger;
pub mod matcher;
pub mod mock;
pub mod settings;
pub mod store;

pub use config::ServerConfig;
pub use control::{
    ClientOptions, ConnectionState, ControlPlaneClient, ControlPlaneServer, Envelope, MessageType,
    ServerContext,
};
pub use error::{ControlError, GenerateError, MockError, StoreError};
pub use events::{Event, EventBus, Topic};
pub use generate::{GenerateContext, MockResponder, ResponderOutput, ResponderRegistry};
pub use ledger::{LedgerStore, NewRequestRecord, RequestRecord};
pub use mock::{GeneratedResponse, MockStore, MockType, RequestDescriptor, Rule};
pub use settings::{Settings, SettingsStore};
pub use store::{KeyedStore, Page, PageQuery};
