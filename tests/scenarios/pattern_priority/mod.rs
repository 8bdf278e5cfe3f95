crate::system_test_cases!(
    // `baz.o` has no `baz.c` source, only `baz.cc`, so among same-stem-length pattern/suffix
    // candidates it must fall through to `.cc.o:` while `foo.o`/`bar.o` use the `%.c`-based ones.
    {
        args: &["all"],
        expected_stdout: "echo foo.c > foo.o\necho bar.c > bar.o\necho baz.cc > baz.o\n",
        expected_stderr: "?",
        expected_files: &[
            ("foo.o", "foo.c\n"),
            ("bar.o", "bar.c\n"),
            ("baz.o", "baz.cc\n"),
        ],
    },
);
