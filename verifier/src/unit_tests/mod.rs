mod handle_tests;
