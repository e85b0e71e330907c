use serde_json::{json, Value};

/// What a wishlist entry points at: a job posting (developers) or a
/// developer's user account (companies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WishlistTarget {
    Job(String),
    User(String),
}

impl WishlistTarget {
    pub fn to_body(&self) -> Value {
        match self {
            WishlistTarget::Job(id) => json!({ "job_post_id": id }),
            WishlistTarget::User(id) => json!({ "wishlisted_user_id": id }),
        }
    }
}
