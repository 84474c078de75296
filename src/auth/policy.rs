//! Authorization rules and the evaluator seam.
//!
//! The pipeline only knows a rule's *name* and the *input* it hands over.
//! What a rule means lives behind [`PolicyEngine`]; [`RuleSet`] is the
//! in-process engine shipped by default.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

/// Role granting administrative access.
pub const ROLE_ADMIN: &str = "ADMIN";
/// Role of a regular user.
pub const ROLE_USER: &str = "USER";

/// A named authorization policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "&'static str")]
pub enum Rule {
    /// Any authenticated caller holding a known role.
    Any,
    AdminOnly,
    UserOnly,
    /// Admins, or the caller whose subject matches the path's user id.
    AdminOrSubject,
}

impl Rule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any            => "any",
            Self::AdminOnly      => "admin-only",
            Self::UserOnly       => "user-only",
            Self::AdminOrSubject => "admin-or-subject-match",
        }
    }
}

impl From<Rule> for &'static str {
    fn from(rule: Rule) -> Self { rule.as_str() }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rule {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any"                    => Ok(Self::Any),
            "admin-only"             => Ok(Self::AdminOnly),
            "user-only"              => Ok(Self::UserOnly),
            "admin-or-subject-match" => Ok(Self::AdminOrSubject),
            other                    => Err(PolicyError::UnknownRule(other.to_owned())),
        }
    }
}

/// Everything a rule may look at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PolicyInput {
    pub rule: Rule,
    pub roles: Vec<String>,
    pub subject: String,
    /// Target user id resolved from the path, if the route has one.
    pub user_id: Option<String>,
}

impl PolicyInput {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("unknown rule {0:?}")]
    UnknownRule(String),

    #[error("policy evaluation failed: {0}")]
    Evaluation(String),
}

/// Decides allow / deny for a rule and its input.
#[async_trait]
pub trait PolicyEngine: Send + Sync + 'static {
    async fn evaluate(&self, rule: Rule, input: &PolicyInput) -> Result<bool, PolicyError>;
}

/// A single rule's logic.
pub trait Policy: Send + Sync + 'static {
    fn allows(&self, input: &PolicyInput) -> bool;
}

#[derive(Clone, Copy, Debug)]
pub struct AnyRole;

impl Policy for AnyRole {
    fn allows(&self, input: &PolicyInput) -> bool {
        input.has_role(ROLE_ADMIN) || input.has_role(ROLE_USER)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AdminOnly;

impl Policy for AdminOnly {
    fn allows(&self, input: &PolicyInput) -> bool {
        input.has_role(ROLE_ADMIN)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct UserOnly;

impl Policy for UserOnly {
    fn allows(&self, input: &PolicyInput) -> bool {
        input.has_role(ROLE_USER)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AdminOrSubject;

impl Policy for AdminOrSubject {
    fn allows(&self, input: &PolicyInput) -> bool {
        input.has_role(ROLE_ADMIN) || input.user_id.as_deref() == Some(input.subject.as_str())
    }
}

/// In-process engine: one [`Policy`] per [`Rule`].
#[derive(Clone, Default)]
pub struct RuleSet {
    policies: HashMap<Rule, Arc<dyn Policy>>,
}

impl RuleSet {
    /// No rules; every evaluation fails with [`PolicyError::UnknownRule`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// The four standard rules.
    pub fn standard() -> Self {
        Self::empty()
            .with(Rule::Any, AnyRole)
            .with(Rule::AdminOnly, AdminOnly)
            .with(Rule::UserOnly, UserOnly)
            .with(Rule::AdminOrSubject, AdminOrSubject)
    }

    /// Installs or replaces the policy behind `rule`.
    pub fn with(mut self, rule: Rule, policy: impl Policy) -> Self {
        self.policies.insert(rule, Arc::new(policy));
        self
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.policies.keys()).finish()
    }
}

#[async_trait]
impl PolicyEngine for RuleSet {
    async fn evaluate(&self, rule: Rule, input: &PolicyInput) -> Result<bool, PolicyError> {
        let policy = self
            .policies
            .get(&rule)
            .ok_or_else(|| PolicyError::UnknownRule(rule.as_str().to_owned()))?;
        Ok(policy.allows(input))
    }
}
