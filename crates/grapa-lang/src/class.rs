use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use smol_str::SmolStr;
use thiserror::Error;
use tracing::debug;

use crate::{
    Engine, Node,
    kind::Kind,
    library::{LoadTable, RecursiveLoad},
};

pub const DEFAULT_PATHS: [&str; 3] = ["$HOME/.grapa", "$ORIGIN/../lib/grapa", "$ORIGIN"];

/// Precompiled classes win over script sources in the same directory.
const EXTENSIONS: [&str; 2] = ["grz", "grc"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassError {
    #[error("Class \"{0}\" not found")]
    NotFound(SmolStr),
    #[error("Failed to read \"{path}\": {message}")]
    Io { path: String, message: String },
    #[error("Class \"{name}\" failed to load: {message}")]
    Eval { name: SmolStr, message: String },
    #[error(transparent)]
    Recursive(#[from] RecursiveLoad),
}

static CLASSES: LazyLock<LoadTable<Node>> = LazyLock::new(LoadTable::new);

/// Expands `$HOME` and `$ORIGIN` (the current directory) in `paths`, falling
/// back to [`DEFAULT_PATHS`] when empty.
pub fn search_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let home = dirs::home_dir().map(|p| p.to_string_lossy().into_owned());
    let origin = std::env::current_dir()
        .ok()
        .map(|p| p.to_string_lossy().into_owned());

    let paths = if paths.is_empty() {
        DEFAULT_PATHS.iter().map(|p| p.to_string()).collect::<Vec<_>>()
    } else {
        paths.iter().map(|p| p.to_string_lossy().into_owned()).collect()
    };

    paths
        .into_iter()
        .filter_map(|path| {
            let path = match (&home, path.contains("$HOME")) {
                (Some(home), true) => path.replace("$HOME", home),
                (None, true) => return None,
                _ => path,
            };
            let path = match (&origin, path.contains("$ORIGIN")) {
                (Some(origin), true) => path.replace("$ORIGIN", origin),
                (None, true) => return None,
                _ => path,
            };
            Some(PathBuf::from(path))
        })
        .collect()
}

/// First `<dir>/<name>.grz` or `<dir>/<name>.grc` across `paths`.
pub fn find_class(name: &str, paths: &[PathBuf]) -> Option<PathBuf> {
    search_paths(paths).into_iter().find_map(|dir| {
        EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{name}.{ext}")))
            .find(|path| path.is_file())
    })
}

/// Resolves a class by name: a `CLASS` variable first, then the process-wide
/// cache, then the search paths.
pub fn load_class(engine: &mut Engine, name: &str) -> Result<Node, ClassError> {
    if let Some(class) = engine.env.get(name).filter(|value| value.kind == Kind::Class) {
        return Ok(class.clone());
    }

    let paths = engine.options.search_paths.clone();
    CLASSES.get_or_load(name, |name| {
        let path = find_class(name, &paths).ok_or_else(|| ClassError::NotFound(SmolStr::new(name)))?;
        load_file(engine, name, &path)
    })
}

fn load_file(engine: &mut Engine, name: &str, path: &Path) -> Result<Node, ClassError> {
    debug!(class = name, path = %path.display(), "load class");
    let bytes = fs::read(path).map_err(|e| ClassError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    // the class body runs in its own scope; what it defines becomes the class
    engine.env.push();
    let result = engine.eval_bytes(&bytes);
    let members = engine.env.pop();

    result.map_err(|e| ClassError::Eval {
        name: SmolStr::new(name),
        message: e.to_string(),
    })?;
    Ok(Node::list(Kind::Class, members).with_name(name))
}

pub fn cached_class(name: &str) -> Option<Node> {
    CLASSES.get(name)
}

/// Drops a cached class so the next load reads it again.
pub fn forget_class(name: &str) -> Option<Node> {
    CLASSES.remove(name)
}

pub fn class_names() -> Vec<SmolStr> {
    CLASSES.names()
}
