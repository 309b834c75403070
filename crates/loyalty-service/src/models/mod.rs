//! 领域模型定义

pub mod catalog;
pub mod client;
pub mod enums;
pub mod gift;
pub mod sync;

pub use catalog::{CatalogItem, Redemption};
pub use client::{
    Client, LedgerAudit, LedgerMovement, MovementPlan, MovementRequest, MovementResult,
    normalize_phone,
};
pub use enums::{
    BenefitStatus, GiftKind, GiftLinkStatus, ItemKind, MembershipTier, MovementKind,
    RecipientMode, RedemptionStatus, SyncOperation, SyncStatus,
};
pub use gift::{ExpireReport, GiftLink, GiftRedemption, GrantedBenefit, LinkCheck};
pub use sync::{EventReceipt, NewSyncItem, SyncQueueItem};
