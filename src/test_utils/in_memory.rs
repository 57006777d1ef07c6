use std::collections::BTreeMap;
use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Duration;
use tokio::time::Instant;

use crate::BackendError;
use crate::BackendResult;
use crate::RawAction;
use crate::RawEvent;
use crate::RawNode;
use crate::StoreBackend;

/// Deterministic in-process [`StoreBackend`].
///
/// Models the store semantics the adapter is written against: hierarchical
/// keys with implicit parent directories, TTL expiry on tokio's (pausable)
/// clock, densely increasing write indexes, and a bounded notification
/// history window. A reachability switch simulates the store going down.
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    changed: Notify,
}

struct StoreState {
    entries: BTreeMap<String, Entry>,
    /// Store-wide index; every write bumps it by exactly one, so event
    /// indexes are dense
    index: u64,
    log: VecDeque<RawEvent>,
    history_window: usize,
    unreachable: bool,
}

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    dir: bool,
    modified_index: u64,
    deadline: Option<Instant>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_history_window(usize::MAX)
    }

    /// A store that retains only the `window` most recent notifications,
    /// like a real backend's bounded event history.
    pub fn with_history_window(window: usize) -> Self {
        Self {
            state: Mutex::new(StoreState {
                entries: BTreeMap::new(),
                index: 0,
                log: VecDeque::new(),
                history_window: window,
                unreachable: false,
            }),
            changed: Notify::new(),
        }
    }

    /// Simulates the store going down (or coming back). While down, every
    /// call fails with [`BackendError::Unreachable`], pending long polls
    /// included.
    pub fn set_unreachable(
        &self,
        down: bool,
    ) {
        self.state.lock().unreachable = down;
        self.changed.notify_waiters();
    }

    /// Creates an explicit (possibly empty) directory, as an external
    /// actor would.
    pub fn create_dir(
        &self,
        key: &str,
    ) {
        let key = normalize(key);
        {
            let mut state = self.state.lock();
            if state.entries.contains_key(&key) || key == "/" {
                return;
            }
            state.index += 1;
            let index = state.index;
            insert_parents(&mut state, &key, index);
            state.entries.insert(
                key.clone(),
                Entry {
                    value: Vec::new(),
                    dir: true,
                    modified_index: index,
                    deadline: None,
                },
            );
            let node = RawNode {
                key,
                dir: true,
                modified_index: index,
                ..Default::default()
            };
            log_event(
                &mut state,
                RawEvent {
                    action: RawAction::Create,
                    index,
                    node: Some(node),
                    prev_node: None,
                },
            );
        }
        self.changed.notify_waiters();
    }

    /// Whether a live (unexpired) node occupies `key` right now.
    pub fn contains_key(
        &self,
        key: &str,
    ) -> bool {
        let key = normalize(key);
        let (expired, present) = {
            let mut state = self.state.lock();
            let before = state.index;
            state.expire_due(Instant::now());
            (state.index != before, state.entries.contains_key(&key))
        };
        if expired {
            self.changed.notify_waiters();
        }
        present
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn get(
        &self,
        key: &str,
    ) -> BackendResult<RawNode> {
        let key = normalize(key);
        let (result, produced) = {
            let mut state = self.state.lock();
            if state.unreachable {
                return Err(unreachable());
            }
            let before = state.index;
            let now = Instant::now();
            state.expire_due(now);
            let result = match state.entries.get(&key) {
                Some(entry) => Ok(raw_of(&key, entry, now)),
                None if key == "/" => Ok(RawNode {
                    key,
                    dir: true,
                    ..Default::default()
                }),
                None => Err(BackendError::KeyNotFound { key }),
            };
            (result, state.index != before)
        };
        if produced {
            self.changed.notify_waiters();
        }
        result
    }

    async fn list_directory(
        &self,
        key: &str,
        recursive: bool,
    ) -> BackendResult<RawNode> {
        let key = normalize(key);
        let (result, produced) = {
            let mut state = self.state.lock();
            if state.unreachable {
                return Err(unreachable());
            }
            let before = state.index;
            let now = Instant::now();
            state.expire_due(now);

            let result = if key == "/" {
                let mut root = RawNode {
                    key: key.clone(),
                    dir: true,
                    ..Default::default()
                };
                root.nodes = children_of(&state, &key, recursive, now);
                Ok(root)
            } else {
                match state.entries.get(&key) {
                    None => Err(BackendError::KeyNotFound { key }),
                    Some(entry) if !entry.dir => Err(BackendError::NotADirectory { key }),
                    Some(entry) => {
                        let mut dir = raw_of(&key, entry, now);
                        dir.nodes = children_of(&state, &key, recursive, now);
                        Ok(dir)
                    }
                }
            };
            (result, state.index != before)
        };
        if produced {
            self.changed.notify_waiters();
        }
        result
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_secs: u64,
    ) -> BackendResult<RawNode> {
        let key = normalize(key);
        let result = {
            let mut state = self.state.lock();
            if state.unreachable {
                return Err(unreachable());
            }
            let now = Instant::now();
            state.expire_due(now);

            if key == "/" || state.entries.contains_key(&key) {
                return Err(BackendError::KeyExists { key });
            }
            if let Some(blocking) = leaf_ancestor(&state, &key) {
                return Err(BackendError::NotADirectory { key: blocking });
            }

            state.index += 1;
            let index = state.index;
            insert_parents(&mut state, &key, index);
            let entry = Entry {
                value,
                dir: false,
                modified_index: index,
                deadline: deadline_for(ttl_secs, now),
            };
            let raw = raw_of(&key, &entry, now);
            state.entries.insert(key, entry);
            log_event(
                &mut state,
                RawEvent {
                    action: RawAction::Create,
                    index,
                    node: Some(raw.clone()),
                    prev_node: None,
                },
            );
            raw
        };
        self.changed.notify_waiters();
        Ok(result)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_secs: u64,
    ) -> BackendResult<RawNode> {
        let key = normalize(key);
        let result = {
            let mut state = self.state.lock();
            if state.unreachable {
                return Err(unreachable());
            }
            let now = Instant::now();
            state.expire_due(now);

            if key == "/" {
                return Err(BackendError::NotAFile { key });
            }
            if let Some(entry) = state.entries.get(&key) {
                if entry.dir {
                    return Err(BackendError::NotAFile { key });
                }
            }
            if let Some(blocking) = leaf_ancestor(&state, &key) {
                return Err(BackendError::NotADirectory { key: blocking });
            }

            let prev = state
                .entries
                .get(&key)
                .map(|entry| raw_of(&key, entry, now));
            state.index += 1;
            let index = state.index;
            insert_parents(&mut state, &key, index);
            let entry = Entry {
                value,
                dir: false,
                modified_index: index,
                deadline: deadline_for(ttl_secs, now),
            };
            let raw = raw_of(&key, &entry, now);
            state.entries.insert(key, entry);
            log_event(
                &mut state,
                RawEvent {
                    action: RawAction::Set,
                    index,
                    node: Some(raw.clone()),
                    prev_node: prev,
                },
            );
            raw
        };
        self.changed.notify_waiters();
        Ok(result)
    }

    async fn delete(
        &self,
        key: &str,
        recursive: bool,
    ) -> BackendResult<RawNode> {
        let key = normalize(key);
        let result = {
            let mut state = self.state.lock();
            if state.unreachable {
                return Err(unreachable());
            }
            let now = Instant::now();
            state.expire_due(now);

            if key == "/" {
                return Err(BackendError::Raw {
                    code: 107,
                    message: "root is read only".to_string(),
                });
            }
            let entry = match state.entries.get(&key) {
                None => return Err(BackendError::KeyNotFound { key }),
                Some(entry) => entry.clone(),
            };
            if entry.dir && !recursive {
                return Err(BackendError::NotAFile { key });
            }

            let prev = raw_of(&key, &entry, now);
            state.entries.remove(&key);
            if entry.dir {
                let descendant_prefix = format!("{}/", key);
                state
                    .entries
                    .retain(|k, _| !k.starts_with(&descendant_prefix));
            }

            state.index += 1;
            let index = state.index;
            log_event(
                &mut state,
                RawEvent {
                    action: RawAction::Delete,
                    index,
                    node: Some(RawNode {
                        key: key.clone(),
                        dir: entry.dir,
                        modified_index: index,
                        ..Default::default()
                    }),
                    prev_node: Some(prev.clone()),
                },
            );
            prev
        };
        self.changed.notify_waiters();
        Ok(result)
    }

    async fn current_index(&self) -> BackendResult<u64> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(unreachable());
        }
        state.expire_due(Instant::now());
        Ok(state.index)
    }

    async fn watch_next(
        &self,
        prefix: &str,
        after_index: u64,
    ) -> BackendResult<RawEvent> {
        let prefix = normalize(prefix);
        loop {
            // Register interest before inspecting state, so a write
            // between the check and the await cannot be missed.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (wait_deadline, produced) = {
                let mut state = self.state.lock();
                if state.unreachable {
                    return Err(unreachable());
                }
                let before = state.index;
                state.expire_due(Instant::now());
                let produced = state.index != before;

                if let Some(front) = state.log.front() {
                    if after_index + 1 < front.index {
                        return Err(BackendError::EventIndexCleared {
                            oldest_available: front.index,
                        });
                    }
                }
                if let Some(event) = state
                    .log
                    .iter()
                    .find(|e| e.index > after_index && key_under(&prefix, event_key(e)))
                {
                    return Ok(event.clone());
                }
                (state.earliest_deadline(), produced)
            };
            if produced {
                self.changed.notify_waiters();
            }

            match wait_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified.as_mut() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

impl StoreState {
    /// Collects every entry whose deadline has passed, logging one Expire
    /// event per node.
    fn expire_due(
        &mut self,
        now: Instant,
    ) {
        let due: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline.map_or(false, |d| d <= now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in due {
            if let Some(entry) = self.entries.remove(&key) {
                let prev = RawNode {
                    key: key.clone(),
                    value: entry.value,
                    dir: entry.dir,
                    ttl: 1,
                    modified_index: entry.modified_index,
                    nodes: Vec::new(),
                };
                self.index += 1;
                let index = self.index;
                log_event(
                    self,
                    RawEvent {
                        action: RawAction::Expire,
                        index,
                        node: Some(RawNode {
                            key: key.clone(),
                            dir: prev.dir,
                            modified_index: index,
                            ..Default::default()
                        }),
                        prev_node: Some(prev),
                    },
                );
            }
        }
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        self.entries.values().filter_map(|e| e.deadline).min()
    }
}

fn unreachable() -> BackendError {
    BackendError::Unreachable {
        reason: "store is down".to_string(),
    }
}

fn normalize(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn deadline_for(
    ttl_secs: u64,
    now: Instant,
) -> Option<Instant> {
    if ttl_secs == 0 {
        None
    } else {
        Some(now + Duration::from_secs(ttl_secs))
    }
}

fn raw_of(
    key: &str,
    entry: &Entry,
    now: Instant,
) -> RawNode {
    RawNode {
        key: key.to_string(),
        value: entry.value.clone(),
        dir: entry.dir,
        ttl: remaining_ttl(entry.deadline, now),
        modified_index: entry.modified_index,
        nodes: Vec::new(),
    }
}

fn remaining_ttl(
    deadline: Option<Instant>,
    now: Instant,
) -> u64 {
    match deadline {
        Some(d) if d > now => ((d - now).as_secs_f64().ceil() as u64).max(1),
        Some(_) => 1,
        None => 0,
    }
}

/// Ancestor directories of `key`, nearest last, excluding the root.
fn ancestors(key: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = 1;
    while let Some(i) = key[pos..].find('/') {
        out.push(key[..pos + i].to_string());
        pos += i + 1;
    }
    out
}

/// First ancestor of `key` that exists as a leaf, blocking directory
/// creation underneath it.
fn leaf_ancestor(
    state: &StoreState,
    key: &str,
) -> Option<String> {
    ancestors(key)
        .into_iter()
        .find(|a| state.entries.get(a).map_or(false, |e| !e.dir))
}

fn insert_parents(
    state: &mut StoreState,
    key: &str,
    index: u64,
) {
    for parent in ancestors(key) {
        state.entries.entry(parent).or_insert(Entry {
            value: Vec::new(),
            dir: true,
            modified_index: index,
            deadline: None,
        });
    }
}

fn children_of(
    state: &StoreState,
    dir_key: &str,
    recursive: bool,
    now: Instant,
) -> Vec<RawNode> {
    let prefix = if dir_key == "/" {
        "/".to_string()
    } else {
        format!("{}/", dir_key)
    };

    let mut children = Vec::new();
    for (k, e) in state.entries.range(prefix.clone()..) {
        if !k.starts_with(&prefix) {
            break;
        }
        let rest = &k[prefix.len()..];
        if rest.is_empty() || rest.contains('/') {
            continue;
        }
        let mut child = raw_of(k, e, now);
        if e.dir && recursive {
            child.nodes = children_of(state, k, recursive, now);
        }
        children.push(child);
    }
    children
}

fn log_event(
    state: &mut StoreState,
    event: RawEvent,
) {
    state.log.push_back(event);
    while state.log.len() > state.history_window {
        state.log.pop_front();
    }
}

fn event_key(event: &RawEvent) -> &str {
    event.node.as_ref().map(|n| n.key.as_str()).unwrap_or("")
}

fn key_under(
    prefix: &str,
    key: &str,
) -> bool {
    if prefix == "/" {
        return true;
    }
    key == prefix
        || key
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.starts_with('/'))
}
