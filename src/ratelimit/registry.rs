//! Identity registry and user-agent classification.
//!
//! The registry is an ordered list of (pattern, quota) rules. A user agent
//! belongs to the first rule whose pattern it contains; later rules are never
//! consulted once an earlier one matches, even if they are more specific.

use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{BotThrottleError, Result};

/// Prefix of the environment variables that override a single quota.
pub const QUOTA_ENV_PREFIX: &str = "BOT_LIMIT_";

/// A single registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRule {
    /// Substring expected in the user agent (case-sensitive)
    pub pattern: String,
    /// Requests allowed per window
    pub quota: u64,
}

impl IdentityRule {
    /// Create a new rule.
    pub fn new(pattern: impl Into<String>, quota: u64) -> Self {
        Self {
            pattern: pattern.into(),
            quota,
        }
    }

    /// Name of the environment variable that overrides this rule's quota.
    ///
    /// `Googlebot-Image` becomes `BOT_LIMIT_GOOGLEBOT_IMAGE`.
    pub fn override_var(&self) -> String {
        let normalized: String = self
            .pattern
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", QUOTA_ENV_PREFIX, normalized)
    }
}

/// A classified client identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity<'a> {
    /// The matched pattern, used as the identity name
    pub name: &'a str,
    /// The configured quota for this identity
    pub quota: u64,
}

/// Ordered set of known identities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityRegistry {
    rules: Vec<IdentityRule>,
}

impl IdentityRegistry {
    /// Create a registry from rules in evaluation order.
    pub fn new(rules: Vec<IdentityRule>) -> Self {
        Self { rules }
    }

    /// The built-in table of well-known crawlers.
    pub fn builtin() -> Self {
        const TABLE: &[(&str, u64)] = &[
            // Search engines
            ("Googlebot", 60),
            ("Googlebot-Image", 30),
            ("Googlebot-News", 30),
            ("Googlebot-Video", 30),
            ("Google-InspectionTool", 10),
            ("AdsBot-Google", 20),
            ("Mediapartners-Google", 20),
            ("APIs-Google", 60),
            ("bingbot", 60),
            ("msnbot", 30),
            ("adidxbot", 20),
            ("BingPreview", 10),
            ("Baiduspider", 30),
            ("YandexBot", 30),
            ("DuckDuckBot", 30),
            ("Slurp", 30),
            // Social previews
            ("facebookexternalhit", 60),
            ("Twitterbot", 60),
            ("LinkedInBot", 30),
            ("Pinterest", 30),
            // AI crawlers
            ("ChatGPT-User", 30),
            ("GPTBot", 30),
            ("OAI-SearchBot", 30),
            ("anthropic-ai", 30),
            ("Claude-Web", 30),
            ("ClaudeBot", 30),
            ("Google-Extended", 20),
            ("PerplexityBot", 30),
            ("YouBot", 30),
            ("cohere-ai", 20),
            // Everything else
            ("Applebot", 30),
            ("Amazonbot", 30),
            ("archive.org_bot", 10),
            ("ia_archiver", 10),
        ];

        Self::new(
            TABLE
                .iter()
                .map(|&(pattern, quota)| IdentityRule::new(pattern, quota))
                .collect(),
        )
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[IdentityRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Classify a user agent.
    ///
    /// Returns the first rule whose pattern is a substring of `user_agent`.
    /// A missing or empty user agent never matches.
    pub fn classify(&self, user_agent: Option<&str>) -> Option<Identity<'_>> {
        let user_agent = user_agent.filter(|ua| !ua.is_empty())?;

        let identity = self
            .rules
            .iter()
            .find(|rule| user_agent.contains(rule.pattern.as_str()))
            .map(|rule| Identity {
                name: &rule.pattern,
                quota: rule.quota,
            });

        trace!(
            user_agent = %user_agent,
            bot = identity.map(|i| i.name),
            "Classified user agent"
        );

        identity
    }

    /// Check that every pattern is usable as an identity name.
    ///
    /// Patterns must be non-empty, since an empty pattern matches every user
    /// agent, and must be valid header values because they are echoed back in
    /// `X-Bot-Detected`.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            if rule.pattern.is_empty() {
                return Err(BotThrottleError::Config(
                    "identity pattern must not be empty".to_string(),
                ));
            }
            if HeaderValue::from_str(&rule.pattern).is_err() {
                return Err(BotThrottleError::Config(format!(
                    "identity pattern {:?} is not a valid header value",
                    rule.pattern
                )));
            }
        }
        Ok(())
    }

    /// Replace quotas with values from `BOT_LIMIT_*` variables.
    ///
    /// `vars` is usually the process environment. A value that does not parse
    /// as a non-negative integer is an error. Returns the `BOT_LIMIT_*`
    /// variables that matched no rule.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut vars: Vec<(K, V)> = vars
            .into_iter()
            .filter(|(k, _)| k.as_ref().starts_with(QUOTA_ENV_PREFIX))
            .collect();

        for rule in &mut self.rules {
            let var = rule.override_var();
            let Some(pos) = vars.iter().position(|(k, _)| k.as_ref() == var) else {
                continue;
            };
            let (_, value) = vars.swap_remove(pos);

            let value = value.as_ref().trim();
            rule.quota = value
                .parse()
                .map_err(|_| BotThrottleError::InvalidQuota {
                    identity: rule.pattern.clone(),
                    value: value.to_string(),
                })?;

            debug!(bot = %rule.pattern, quota = rule.quota, var = %var, "Applied quota override");
        }

        let unknown: Vec<String> = vars.iter().map(|(k, _)| k.as_ref().to_string()).collect();
        for var in &unknown {
            warn!(var = %var, "Unknown quota override");
        }

        Ok(unknown)
    }
}
