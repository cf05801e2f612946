pub mod certificates;
pub mod cmc;
