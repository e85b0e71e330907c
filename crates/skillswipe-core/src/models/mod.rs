//! Data models for SkillSwipe API payloads.
//!
//! Only the payloads the client itself inspects are typed:
//!
//! - `User`, `LoginResponse`, `RefreshResponse`: auth exchange and the
//!   stored user object
//! - `ProfileStatus`, `ActivityPing`: account status checks
//! - `SwipeRequest`, `SwipeOutcome`, `DashboardTab`: swipe recording and feeds
//! - `WishlistTarget`: what a wishlist entry points at
//!
//! Profile, job and feed bodies pass through as `serde_json::Value`.

pub mod swipe;
pub mod user;
pub mod wishlist;

pub use swipe::{DashboardTab, SwipeOutcome, SwipeRequest, SwipeType};
pub use user::{ActivityPing, LoginResponse, ProfileStatus, RefreshResponse, Role, User, UserStatus};
pub use wishlist::WishlistTarget;
