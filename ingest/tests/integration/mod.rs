mod extraction_test;
mod load_test;
mod run_test;
