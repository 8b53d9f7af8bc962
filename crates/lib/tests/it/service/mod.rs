mod cycle_tests;
mod processing_tests;
mod reconcile_tests;
