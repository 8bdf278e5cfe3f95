crate::system_test_cases!(
    // `test` depends on `foo` normally and `bar` order-only: touching `bar` alone must not
    // trigger a rebuild, only `foo` changing (or `test` missing) does.
    {
        args: &[],
        expected_stdout: "echo built > test\n",
        expected_stderr: "",
        expected_files: &[],
    },
    {
        args: &[],
        expected_stdout: "",
        expected_stderr: "?",
        expected_files: &[],
        pre_hook: {
            std::thread::sleep(std::time::Duration::from_millis(1100));
            std::fs::write("tests/scenarios/order_only_rebuild/bar", "bar-contents-touched\n").unwrap();
        },
    },
    {
        args: &[],
        expected_stdout: "echo built > test\n",
        expected_stderr: "?",
        expected_files: &[],
        pre_hook: {
            std::thread::sleep(std::time::Duration::from_millis(1100));
            std::fs::write("tests/scenarios/order_only_rebuild/foo", "foo-contents-touched\n").unwrap();
        },
        post_hook: {
            std::fs::remove_file("tests/scenarios/order_only_rebuild/test").unwrap();
        },
    },
);
