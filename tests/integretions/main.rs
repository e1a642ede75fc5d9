mod test_utils;

mod concurrent_test;
mod executor_test;
mod sql_test;
mod storage_test;
mod transaction_test;
