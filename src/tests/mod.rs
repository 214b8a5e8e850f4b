mod buffer_pool_manager_test;
mod mvcc_test;
mod page_guard_test;
mod table_heap_test;
