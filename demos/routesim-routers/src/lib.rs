//! Two [`routesim_core::RouterHandler`] implementations demonstrating real routing
//! algorithms on top of the substrate: a distance-vector router and a link-state
//! router. Neither is present in the reference implementation this crate's substrate
//! is grounded on — they exist so the CLI's algorithm selector has something to
//! select between.

mod dv;
mod ls;

pub use dv::DvRouter;
pub use ls::LsRouter;
