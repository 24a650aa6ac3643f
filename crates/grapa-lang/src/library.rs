pub mod system;

use std::{
    sync::{Arc, Condvar, LazyLock, Mutex, MutexGuard, PoisonError, RwLock},
    thread::{self, ThreadId},
};

use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use thiserror::Error;
use tracing::debug;

use crate::{Engine, Node, eval::error::RuntimeError};

pub const SYSTEM_LIBRARY: &str = "$SYS";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LibraryError {
    #[error("Library \"{0}\" not found")]
    NotFound(SmolStr),
    #[error(transparent)]
    Recursive(#[from] RecursiveLoad),
}

/// A load of `name` was requested while the same thread was already loading it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("\"{0}\" is already being loaded by this thread")]
pub struct RecursiveLoad(pub SmolStr);

/// A named function table. Everything a script does beyond plain evaluation
/// goes through one of these.
pub trait Library: Send + Sync {
    fn name(&self) -> &str;

    /// Runs `function`. `args` are unevaluated operation trees; use
    /// [`Engine::eval_args`] for eager arguments.
    fn run(&self, engine: &mut Engine, function: &str, args: Vec<Node>) -> Result<Node, RuntimeError>;

    /// Compile-time rewrite of a call node to `function`.
    fn optimize(&self, _engine: &Engine, node: Node, _function: &str) -> Node {
        node
    }
}

/// Supplies libraries that were not registered up front.
pub trait LibraryLoader: Send + Sync {
    fn load(&self, name: &str) -> Option<Arc<dyn Library>>;
}

struct LoadState<T> {
    loaded: FxHashMap<SmolStr, T>,
    loading: FxHashMap<SmolStr, ThreadId>,
}

/// Process-wide cache of lazily loaded values.
///
/// The lock is released while a loader runs, so a loader may itself load
/// other names. Concurrent requests for a name that is being loaded wait for
/// that load and then check the cache again.
pub struct LoadTable<T> {
    state: Mutex<LoadState<T>>,
    ready: Condvar,
}

impl<T: Clone> Default for LoadTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> LoadTable<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoadState {
                loaded: FxHashMap::default(),
                loading: FxHashMap::default(),
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoadState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Option<T> {
        self.lock().loaded.get(name).cloned()
    }

    pub fn insert(&self, name: &str, value: T) {
        self.lock().loaded.insert(SmolStr::new(name), value);
        self.ready.notify_all();
    }

    pub fn remove(&self, name: &str) -> Option<T> {
        self.lock().loaded.remove(name)
    }

    pub fn names(&self) -> Vec<SmolStr> {
        let mut names = self.lock().loaded.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn get_or_load<E>(&self, name: &str, load: impl FnOnce(&str) -> Result<T, E>) -> Result<T, E>
    where
        E: From<RecursiveLoad>,
    {
        let mut state = self.lock();
        loop {
            if let Some(value) = state.loaded.get(name) {
                return Ok(value.clone());
            }
            match state.loading.get(name) {
                None => break,
                Some(owner) if *owner == thread::current().id() => {
                    return Err(RecursiveLoad(SmolStr::new(name)).into());
                }
                Some(_) => {
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        state
            .loading
            .insert(SmolStr::new(name), thread::current().id());
        drop(state);

        // cleared on unwind as well; waiters block until this entry is gone
        let pending = scopeguard::guard(SmolStr::new(name), |name| {
            self.lock().loading.remove(&name);
            self.ready.notify_all();
        });

        let result = load(name);
        if let Ok(value) = &result {
            self.lock().loaded.insert(SmolStr::new(name), value.clone());
        }
        drop(pending);

        result
    }
}

static LIBRARIES: LazyLock<LoadTable<Arc<dyn Library>>> = LazyLock::new(|| {
    let table: LoadTable<Arc<dyn Library>> = LoadTable::new();
    table.insert(SYSTEM_LIBRARY, Arc::new(system::SystemLibrary));
    table
});

static LOADERS: LazyLock<RwLock<Vec<Arc<dyn LibraryLoader>>>> =
    LazyLock::new(|| RwLock::new(Vec::new()));

/// Makes `library` available process-wide under its name, replacing any previous one.
pub fn register_library(library: Arc<dyn Library>) {
    let name = SmolStr::new(library.name());
    debug!(library = %name, "register library");
    LIBRARIES.insert(&name, library);
}

pub fn unregister_library(name: &str) -> Option<Arc<dyn Library>> {
    if name == SYSTEM_LIBRARY {
        return None;
    }
    LIBRARIES.remove(name)
}

pub fn register_loader(loader: Arc<dyn LibraryLoader>) {
    LOADERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(loader);
}

pub fn library_names() -> Vec<SmolStr> {
    LIBRARIES.names()
}

/// Returns the named library, asking the registered loaders on first use.
pub fn load_library(name: &str) -> Result<Arc<dyn Library>, LibraryError> {
    LIBRARIES.get_or_load(name, |name| {
        let loaders = LOADERS
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let library = loaders
            .iter()
            .find_map(|loader| loader.load(name))
            .ok_or_else(|| LibraryError::NotFound(SmolStr::new(name)))?;
        debug!(library = %name, "loaded library");
        Ok(library)
    })
}
