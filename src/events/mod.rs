pub mod weak;

pub use weak::WeakEventManager;
