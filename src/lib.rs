pub mod app;

pub use app::cli::run;
