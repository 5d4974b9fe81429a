//! Ballots and the elector seam.

/// What an elector filled in during one round.
///
/// A candidate appears at most once on a ballot, in either list. Once locked
/// the ballot refuses further changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot<C> {
    elector: Option<String>,
    votes_for: Vec<C>,
    votes_against: Vec<C>,
    locked: bool,
}

impl<C: Clone + PartialEq> Ballot<C> {
    pub fn new(elector: impl Into<String>) -> Self {
        Self {
            elector: Some(elector.into()),
            votes_for: Vec::new(),
            votes_against: Vec::new(),
            locked: false,
        }
    }

    /// A ballot that does not record who filled it.
    pub fn secret() -> Self {
        Self {
            elector: None,
            votes_for: Vec::new(),
            votes_against: Vec::new(),
            locked: false,
        }
    }

    pub fn elector(&self) -> Option<&str> {
        self.elector.as_deref()
    }

    /// Approved candidates, most preferred first.
    pub fn votes_for(&self) -> &[C] {
        &self.votes_for
    }

    pub fn votes_against(&self) -> &[C] {
        &self.votes_against
    }

    pub fn is_blank(&self) -> bool {
        self.votes_for.is_empty() && self.votes_against.is_empty()
    }

    fn mentions(&self, candidate: &C) -> bool {
        self.votes_for.contains(candidate) || self.votes_against.contains(candidate)
    }

    /// Approve a candidate. Returns `false` if the ballot is locked or the
    /// candidate is already on it.
    pub fn append_for(&mut self, candidate: C) -> bool {
        if self.locked || self.mentions(&candidate) {
            return false;
        }
        self.votes_for.push(candidate);
        true
    }

    /// Reject a candidate. Same rules as [`Ballot::append_for`].
    pub fn append_against(&mut self, candidate: C) -> bool {
        if self.locked || self.mentions(&candidate) {
            return false;
        }
        self.votes_against.push(candidate);
        true
    }

    /// Replace the approval list. Duplicates and candidates already voted
    /// against are dropped.
    pub fn set_for(&mut self, candidates: impl IntoIterator<Item = C>) -> bool {
        if self.locked {
            return false;
        }
        self.votes_for.clear();
        for candidate in candidates {
            self.append_for(candidate);
        }
        true
    }

    /// Replace the rejection list. Duplicates and approved candidates are
    /// dropped.
    pub fn set_against(&mut self, candidates: impl IntoIterator<Item = C>) -> bool {
        if self.locked {
            return false;
        }
        self.votes_against.clear();
        for candidate in candidates {
            self.append_against(candidate);
        }
        true
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

/// How an elector ended its turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<C> {
    /// The ballot was filled in normally.
    Cast,
    /// The elector imposes a result; the vote ends with this claimant.
    CoupDEtat(C),
}

/// A participant of a vote over candidates `C` about a subject `S`.
pub trait Elector<C, S: ?Sized>: Send + Sync {
    /// Name recorded on non-secret ballots.
    fn name(&self) -> &str;

    /// Fill `ballot` for the given candidates. Electors are expected to lock
    /// their ballot before returning.
    fn vote(&self, candidates: &[C], subject: &S, ballot: &mut Ballot<C>) -> Verdict<C>;
}
