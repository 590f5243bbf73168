//! Authorization outcomes.

/// Result of an authorization callback.
///
/// Deny-by-default: anything that is not an explicit allow resolves to no
/// topics. An [`AuthorizationOutcome::AllowSubset`] whose intersection with the
/// requested topics is empty is a denial.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    /// Every requested topic is allowed.
    Allow,
    /// Nothing is allowed.
    Deny,
    /// Only these topics are allowed (intersected with the request).
    AllowSubset(Vec<String>),
}

impl AuthorizationOutcome {
    /// Allow only `topics`.
    pub fn allow_topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllowSubset(topics.into_iter().map(Into::into).collect())
    }

    /// Topics granted out of `requested`, in request order.
    ///
    /// Returns `None` for a denial, including a subset with an empty
    /// intersection.
    pub fn granted(&self, requested: &[String]) -> Option<Vec<String>> {
        match self {
            Self::Allow => Some(requested.to_vec()),
            Self::Deny => None,
            Self::AllowSubset(allowed) => {
                let granted: Vec<String> = requested
                    .iter()
                    .filter(|t| allowed.contains(t))
                    .cloned()
                    .collect();
                (!granted.is_empty()).then_some(granted)
            }
        }
    }
}

impl From<bool> for AuthorizationOutcome {
    fn from(allowed: bool) -> Self {
        if allowed { Self::Allow } else { Self::Deny }
    }
}
