pub mod btc;
pub mod liquid;
pub mod tree;
