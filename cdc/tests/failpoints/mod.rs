mod position_flush_test;
