pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod index;
pub mod library;
pub mod metadata;
pub mod playlist;
pub mod tasks {
    pub mod control;
    pub mod files;
    pub mod sensor;
    pub mod viewer;
}
