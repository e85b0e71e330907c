use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeType {
    Profile,
    Job,
}

/// Body for recording a swipe. Profile swipes name the other user, job swipes
/// name the posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwipeRequest {
    pub swipe_type: SwipeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl SwipeRequest {
    pub fn profile(target_user_id: impl Into<String>) -> Self {
        Self {
            swipe_type: SwipeType::Profile,
            target_user_id: Some(target_user_id.into()),
            job_id: None,
        }
    }

    pub fn job(job_id: impl Into<String>) -> Self {
        Self {
            swipe_type: SwipeType::Job,
            target_user_id: None,
            job_id: Some(job_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwipeOutcome {
    #[serde(default)]
    pub match_created: bool,
    #[serde(default, rename = "match")]
    pub matched: Option<Value>,
    #[serde(default)]
    pub swipe: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DashboardTab {
    #[default]
    ForMe,
    ShowedInterest,
    Matches,
    Stats,
    /// Any other tab the server understands (e.g. `my_swipes`)
    Other(String),
}

impl DashboardTab {
    pub fn as_str(&self) -> &str {
        match self {
            DashboardTab::ForMe => "for_me",
            DashboardTab::ShowedInterest => "showed_interest",
            DashboardTab::Matches => "matches",
            DashboardTab::Stats => "stats",
            DashboardTab::Other(tab) => tab,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "for_me" => DashboardTab::ForMe,
            "showed_interest" => DashboardTab::ShowedInterest,
            "matches" => DashboardTab::Matches,
            "stats" => DashboardTab::Stats,
            other => DashboardTab::Other(other.to_string()),
        }
    }
}
