//! A miniature collaborative document driven by an operation engine, shared
//! by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};

use tandem::{Operation, OperationEngine, OperationKind, PropertyValue, SiteId};

/// One participant: an engine plus the linear documents it edits, one list
/// of string cells per property key.
///
/// Single-character cells let a whole document read as one string, which
/// keeps convergence assertions legible.
pub struct Site {
    pub engine: OperationEngine,
    pub docs: BTreeMap<String, Vec<String>>,
}

impl Site {
    /// Creates a site whose documents hold one cell per character of each
    /// seed string.
    pub fn new(id: SiteId, docs: &[(&str, &str)]) -> Self {
        let docs = docs
            .iter()
            .map(|(key, text)| {
                let cells = text.chars().map(String::from).collect();
                ((*key).to_owned(), cells)
            })
            .collect();
        Self {
            engine: OperationEngine::new(id),
            docs,
        }
    }

    /// Generates a local edit, applies it to the document, and returns the
    /// operation for delivery to the other sites.
    pub fn local(
        &mut self,
        kind: OperationKind,
        key: &str,
        value: &str,
        position: usize,
    ) -> Operation {
        let payload = match kind {
            OperationKind::Delete => PropertyValue::Null,
            _ => PropertyValue::from(value),
        };
        let op = self.engine.push_local(kind, key, payload, position);
        self.apply(&op);
        op
    }

    /// Feeds a remote operation to the engine, applying the transformed
    /// result if there is anything to apply.
    pub fn remote(&mut self, op: &Operation) -> Option<Operation> {
        let transformed = self
            .engine
            .push_remote(op.clone())
            .expect("history covers the operation");
        if let Some(op) = &transformed {
            self.apply(op);
        }
        transformed
    }

    /// Reports `other`'s document state to this engine, as a transport's
    /// periodic engine-sync messages would.
    pub fn sync_from(&mut self, other: &Site) {
        self.engine
            .push_sync(other.engine.site_id(), other.engine.copy_context_vector());
    }

    /// The document for `key`, joined into one string.
    pub fn text(&self, key: &str) -> String {
        self.docs[key].concat()
    }

    fn apply(&mut self, op: &Operation) {
        let cells = self.docs.entry(op.key().to_owned()).or_default();
        match op.kind() {
            OperationKind::Insert => cells.insert(op.position(), payload_text(op)),
            OperationKind::Delete => {
                cells.remove(op.position());
            }
            OperationKind::Update => cells[op.position()] = payload_text(op),
        }
    }
}

fn payload_text(op: &Operation) -> String {
    match op.value() {
        PropertyValue::String(s) => s.clone(),
        other => panic!("tests only carry string payloads, got {other:?}"),
    }
}

/// Creates `count` mutually aware sites sharing the given seed documents.
pub fn mesh(count: u32, docs: &[(&str, &str)]) -> Vec<Site> {
    let mut sites: Vec<Site> = (0..count).map(|id| Site::new(id, docs)).collect();
    for id in 0..count {
        for site in &mut sites {
            site.engine.thaw_site(id);
        }
    }
    sites
}

/// Creates `count` mutually aware sites sharing one seed document.
pub fn session(count: u32, key: &str, text: &str) -> Vec<Site> {
    mesh(count, &[(key, text)])
}

/// A sequencing relay: the one server of a session, stamping each operation
/// with its place in the total order and broadcasting it, echo included, to
/// every site's inbox in that order.
pub struct Relay {
    pub sites: Vec<Site>,
    inboxes: Vec<VecDeque<Operation>>,
    next_order: u64,
}

impl Relay {
    pub fn new(count: u32, docs: &[(&str, &str)]) -> Self {
        Self {
            sites: mesh(count, docs),
            inboxes: (0..count).map(|_| VecDeque::new()).collect(),
            next_order: 0,
        }
    }

    /// Generates an edit at `origin`, stamps it, and queues it everywhere.
    pub fn send(
        &mut self,
        origin: usize,
        kind: OperationKind,
        key: &str,
        value: &str,
        position: usize,
    ) {
        let op = self.sites[origin].local(kind, key, value, position);
        let ranked = op.with_order(self.next_order);
        self.next_order += 1;
        for inbox in &mut self.inboxes {
            inbox.push_back(ranked.clone());
        }
    }

    /// Delivers the next pending operation at `site`, if any.
    pub fn deliver_next(&mut self, site: usize) -> bool {
        let Some(op) = self.inboxes[site].pop_front() else {
            return false;
        };
        self.sites[site].remote(&op);
        true
    }

    /// Delivers everything pending at `site`.
    pub fn drain(&mut self, site: usize) {
        while self.deliver_next(site) {}
    }

    /// Delivers everything pending everywhere.
    pub fn drain_all(&mut self) {
        for site in 0..self.sites.len() {
            self.drain(site);
        }
    }

    /// True while any inbox still holds operations.
    pub fn pending(&self) -> bool {
        self.inboxes.iter().any(|inbox| !inbox.is_empty())
    }
}

/// Site-to-site delivery with no relay in between: operations go out
/// unranked, and an operation's place in the total order is fixed the first
/// time any site receives it. The origin hears about the rank the same way
/// it would from a relay, through a ranked duplicate of its own operation.
pub struct Direct {
    pub sites: Vec<Site>,
    posted: Vec<Operation>,
    ranks: Vec<Option<u64>>,
    next_order: u64,
}

impl Direct {
    pub fn new(count: u32, docs: &[(&str, &str)]) -> Self {
        Self {
            sites: mesh(count, docs),
            posted: Vec::new(),
            ranks: Vec::new(),
            next_order: 0,
        }
    }

    /// Generates an edit at `origin` and parks it for later delivery,
    /// returning a handle to deliver by.
    pub fn post(
        &mut self,
        origin: usize,
        kind: OperationKind,
        key: &str,
        value: &str,
        position: usize,
    ) -> usize {
        let op = self.sites[origin].local(kind, key, value, position);
        self.posted.push(op);
        self.ranks.push(None);
        self.posted.len() - 1
    }

    /// Delivers a posted operation to one site.
    pub fn deliver(&mut self, site: usize, handle: usize) -> Option<Operation> {
        let order = match self.ranks[handle] {
            Some(order) => order,
            None => {
                let order = self.next_order;
                self.next_order += 1;
                self.ranks[handle] = Some(order);
                let echo = self.posted[handle].with_order(order);
                self.sites[echo.site() as usize].remote(&echo);
                order
            }
        };
        let ranked = self.posted[handle].with_order(order);
        self.sites[site].remote(&ranked)
    }
}
