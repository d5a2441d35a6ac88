pub mod args;
mod dice;
mod n4_bias;
mod topology;
mod utils;
mod zero_norm;
