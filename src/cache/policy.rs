//! TTL Policy Module
//!
//! Maps data categories to default lifetimes and decides which categories are
//! mirrored to the durable tier.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

// == Category ==
/// Predefined label selecting TTL policy and durable-tier eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Profile,
    Listing,
    SubmissionTracking,
    Alerting,
    DerivedAnalysis,
    Template,
    AdminAggregate,
    Static,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 8] = [
        Category::Profile,
        Category::Listing,
        Category::SubmissionTracking,
        Category::Alerting,
        Category::DerivedAnalysis,
        Category::Template,
        Category::AdminAggregate,
        Category::Static,
    ];

    /// The label used in keys and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Profile => "profile",
            Category::Listing => "listing",
            Category::SubmissionTracking => "submission-tracking",
            Category::Alerting => "alerting",
            Category::DerivedAnalysis => "derived-analysis",
            Category::Template => "template",
            Category::AdminAggregate => "admin-aggregate",
            Category::Static => "static",
        }
    }

    /// Key prefix owned by this category (`label + ":"`).
    pub fn key_prefix(&self) -> String {
        format!("{}:", self.as_str())
    }

    /// Environment variable suffix, e.g. `SUBMISSION_TRACKING`.
    pub fn env_suffix(&self) -> String {
        self.as_str().replace('-', "_").to_ascii_uppercase()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Unknown cache category: {}", s))
    }
}

// == TTL Policy ==
/// Static category → TTL table plus the fallback default.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    ttls: HashMap<Category, Duration>,
    default_ttl: Duration,
}

impl TtlPolicy {
    /// Creates a policy with the built-in category table and the given default.
    pub fn new(default_ttl: Duration) -> Self {
        let ttls = Category::ALL
            .iter()
            .map(|c| (*c, Duration::from_secs(builtin_ttl_secs(*c))))
            .collect();
        Self { ttls, default_ttl }
    }

    /// Replaces the TTL for one category.
    pub fn with_ttl(mut self, category: Category, ttl: Duration) -> Self {
        self.ttls.insert(category, ttl);
        self
    }

    /// TTL configured for `category`.
    pub fn ttl_for(&self, category: Category) -> Duration {
        self.ttls.get(&category).copied().unwrap_or(self.default_ttl)
    }

    /// TTL used when neither an explicit TTL nor a category is given.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Resolves `ttl ?? policy[category] ?? default`.
    pub fn resolve(&self, ttl: Option<Duration>, category: Option<Category>) -> Duration {
        ttl.or_else(|| category.map(|c| self.ttl_for(c)))
            .unwrap_or(self.default_ttl)
    }

    /// Whether entries of `category` are mirrored to the durable tier.
    pub fn is_durable(&self, category: Category) -> bool {
        matches!(category, Category::Profile | Category::Template)
    }

    /// Lifetime of dependency fingerprints.
    pub fn fingerprint_ttl(&self) -> Duration {
        self.ttl_for(Category::Static)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5 * MINUTE))
    }
}

fn builtin_ttl_secs(category: Category) -> u64 {
    match category {
        Category::Profile => 10 * MINUTE,
        Category::Listing => 5 * MINUTE,
        Category::SubmissionTracking => 2 * MINUTE,
        Category::Alerting => MINUTE,
        Category::DerivedAnalysis => 30 * MINUTE,
        Category::Template => HOUR,
        Category::AdminAggregate => 5 * MINUTE,
        Category::Static => 24 * HOUR,
    }
}
