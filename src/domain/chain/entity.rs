//! Chain entity: link registration and sub-chain slots

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::branch::{Branch, BranchKey, BranchSlot, Predicate};
use super::error::RegistrationError;
use super::link::{Link, LinkEntry, LinkKind, RunArgs};

const ANONYMOUS: &str = "chain";

struct Links<A> {
    main: Vec<Link<A>>,
    finals: Vec<Link<A>>,
    branches: Vec<BranchSlot<A>>,
}

impl<A> Default for Links<A> {
    fn default() -> Self {
        Self {
            main: Vec::new(),
            finals: Vec::new(),
            branches: Vec::new(),
        }
    }
}

struct ChainInner<A> {
    name: Option<String>,
    links: RwLock<Links<A>>,
}

/// Ordered sequence of links executed one at a time against a shared context
///
/// `Chain` is a handle: clones share the same registration state, so links
/// may be added through any clone, before or between runs. Each run
/// snapshots `main ++ final` when it starts.
pub struct Chain<A = ()> {
    inner: Arc<ChainInner<A>>,
}

impl<A> Clone for Chain<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Chain<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let links = self.read();
        f.debug_struct("Chain")
            .field("name", &self.inner.name)
            .field("links", &links.main.len())
            .field("finals", &links.finals.len())
            .field("branches", &links.branches.len())
            .finish()
    }
}

impl<A: RunArgs> Default for Chain<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: RunArgs> Chain<A> {
    pub fn new() -> Self {
        Self::from_name(None)
    }

    /// Create a chain with a name used in log output
    pub fn named(name: impl Into<String>) -> Self {
        Self::from_name(Some(name.into()))
    }

    fn from_name(name: Option<String>) -> Self {
        Self {
            inner: Arc::new(ChainInner {
                name,
                links: RwLock::new(Links::default()),
            }),
        }
    }

    /// Append a link to the main section
    ///
    /// Returns the number of main links after registration.
    pub fn add(&self, entry: impl Into<LinkEntry<A>>) -> Result<usize, RegistrationError> {
        let link = entry.into().into_link()?;
        let mut links = self.write();
        links.main.push(link);
        Ok(links.main.len())
    }

    /// Append a link to the final section, which runs after every main link
    ///
    /// Returns the number of final links after registration.
    pub fn add_final(&self, entry: impl Into<LinkEntry<A>>) -> Result<usize, RegistrationError> {
        let link = entry.into().into_link()?;
        let mut links = self.write();
        links.finals.push(link);
        Ok(links.finals.len())
    }

    /// Sub-chain that runs only when `predicate` holds
    ///
    /// Passing a clone of a predicate used before returns the existing
    /// sub-chain, so a branch can be built up over several calls.
    pub fn when(&self, predicate: &Predicate<A>) -> Chain<A> {
        self.branch(BranchKey::Predicate(predicate.clone()), predicate.clone())
    }

    /// Sub-chain keyed by an explicit identifier
    ///
    /// The predicate given with the first registration of `key` is the one
    /// evaluated; later calls with the same key return the existing sub-chain.
    pub fn when_keyed(&self, key: impl Into<String>, predicate: Predicate<A>) -> Chain<A> {
        self.branch(BranchKey::Named(key.into()), predicate)
    }

    fn branch(&self, key: BranchKey<A>, predicate: Predicate<A>) -> Chain<A> {
        let mut links = self.write();

        if let Some(slot) = links.branches.iter().find(|slot| slot.key.matches(&key)) {
            return slot.chain.clone();
        }

        let sub = Chain::named(match &key {
            BranchKey::Named(name) => format!("{}/{}", self.label(), name),
            BranchKey::Predicate(_) => format!("{}/when#{}", self.label(), links.branches.len()),
        });

        debug!(parent = self.label(), branch = sub.label(), "Registering sub-chain");

        links.main.push(Link::from_parts(
            LinkKind::Branch,
            Arc::new(Branch::new(predicate, sub.clone())),
        ));
        links.branches.push(BranchSlot {
            key,
            chain: sub.clone(),
        });

        sub
    }

    /// Remove every main link, final link and sub-chain
    pub fn clear(&self) {
        *self.write() = Links::default();
    }

    /// Effective execution sequence: main links, then final links
    pub(crate) fn effective_links(&self) -> Vec<Link<A>> {
        let links = self.read();
        links
            .main
            .iter()
            .chain(links.finals.iter())
            .cloned()
            .collect()
    }
}

impl<A> Chain<A> {
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub(crate) fn label(&self) -> &str {
        self.name().unwrap_or(ANONYMOUS)
    }

    /// Number of main links, sub-chain links included
    pub fn len(&self) -> usize {
        self.read().main.len()
    }

    pub fn final_len(&self) -> usize {
        self.read().finals.len()
    }

    pub fn branch_count(&self) -> usize {
        self.read().branches.len()
    }

    pub fn is_empty(&self) -> bool {
        let links = self.read();
        links.main.is_empty() && links.finals.is_empty()
    }

    /// Whether both handles refer to the same chain
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, Links<A>> {
        self.inner
            .links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Links<A>> {
        self.inner
            .links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
