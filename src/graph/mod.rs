//! Graph analysis: layer/symbol cross-references and conv/norm pairing

mod mapper;
mod pairing;

#[cfg(test)]
mod tests;

pub use mapper::CrossMapper;
pub use pairing::{activation_after, layer_symbol_mapper, pair_conv_norm};
