mod utils;

mod em_tests;
mod lbp_tree_tests;
mod property_tests;
