pub mod clipboard;
pub mod watcher;
