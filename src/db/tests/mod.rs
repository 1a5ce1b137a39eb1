mod tests_maintenance;
mod tests_recovery;
