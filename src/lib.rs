pub mod analysis;
pub mod client;
pub mod config;
pub mod deriv;
pub mod error;
pub mod event;
pub mod feed;

pub mod model {
    pub mod tick;
    pub mod window;
}
