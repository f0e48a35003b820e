pub mod access_adapter;
pub mod attachments;
pub mod conversations;
pub mod db;
pub mod dek_store;
pub mod entries;
pub mod error;
pub mod eviction;
pub mod groups;
pub mod memberships;
pub mod schema;
pub mod service;
pub mod transfers;
pub mod types;

pub use attachments::AttachmentRepository;
pub use conversations::ConversationRepository;
pub use db::{bootstrap_encryption, Db};
pub use dek_store::ConnDekStore;
pub use entries::EntryRepository;
pub use error::{Result, StoreError};
pub use eviction::EvictableConversation;
pub use groups::GroupRepository;
pub use memberships::MembershipRepository;
pub use service::ConversationStore;
pub use transfers::TransferRepository;
pub use types::{
    AttachmentRecord, Conversation, ConversationGroup, ContentBlock, CreateEntryRequest, Entry, ForkSummary,
    Membership, OwnershipTransfer, Page, TransferStatus,
};
