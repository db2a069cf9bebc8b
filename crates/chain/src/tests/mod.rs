pub(crate) mod mock;

mod notifier_tests;
