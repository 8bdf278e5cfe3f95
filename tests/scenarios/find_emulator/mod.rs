crate::system_test_cases!(
    {
        args: &["--use_find_emulator"],
        expected_stdout: "echo \"testdir testdir/file1 testdir/subdir\" > report\n",
        expected_stderr: "",
        expected_files: &[("report", "testdir testdir/file1 testdir/subdir\n")],
    },
);
