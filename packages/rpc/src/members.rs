//! Voice channel membership diffing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identity of one channel member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub user_id: String,
    pub username: String,
    pub avatar: Option<String>,
}

impl MemberRecord {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        avatar: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            avatar,
        }
    }
}

/// Result of [`MemberTracker::update_and_diff`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemberDiff {
    pub joined: Vec<MemberRecord>,
    pub left: Vec<MemberRecord>,
    pub count: usize,
}

impl MemberDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Last known channel membership.
///
/// The first observation of a channel goes through [`MemberTracker::initialize`]
/// and is never reported as joins. Diffs are ordered by user id.
#[derive(Debug, Default)]
pub struct MemberTracker {
    baseline: BTreeMap<String, MemberRecord>,
    primed: bool,
}

impl MemberTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the baseline silently and mark the tracker primed.
    pub fn initialize<I>(&mut self, members: I)
    where
        I: IntoIterator<Item = MemberRecord>,
    {
        self.baseline = index(members);
        self.primed = true;
    }

    /// Diff `members` against the baseline by user id, then adopt them as the new baseline.
    pub fn update_and_diff<I>(&mut self, members: I) -> MemberDiff
    where
        I: IntoIterator<Item = MemberRecord>,
    {
        let current = index(members);

        let joined = current
            .iter()
            .filter(|(id, _)| !self.baseline.contains_key(*id))
            .map(|(_, member)| member.clone())
            .collect();
        let left = self
            .baseline
            .iter()
            .filter(|(id, _)| !current.contains_key(*id))
            .map(|(_, member)| member.clone())
            .collect();
        let count = current.len();

        self.baseline = current;

        MemberDiff {
            joined,
            left,
            count,
        }
    }

    /// False until [`MemberTracker::initialize`] has run at least once.
    pub fn should_emit(&self) -> bool {
        self.primed
    }

    /// Forget the baseline and un-prime (the local user left the channel).
    pub fn reset(&mut self) {
        self.baseline.clear();
        self.primed = false;
    }

    pub fn member_count(&self) -> usize {
        self.baseline.len()
    }
}

fn index<I>(members: I) -> BTreeMap<String, MemberRecord>
where
    I: IntoIterator<Item = MemberRecord>,
{
    members
        .into_iter()
        .filter(|member| !member.user_id.is_empty())
        .map(|member| (member.user_id.clone(), member))
        .collect()
}
