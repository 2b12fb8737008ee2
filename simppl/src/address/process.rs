//! Runs an external helper process off the executor thread (used by the `launchd:` transport to
//! shell out to `launchctl getenv`).

use std::process::{Command, Output};

use crate::Result;

pub(crate) async fn run<I, S>(program: &str, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    blocking::unblock(move || cmd.output())
        .await
        .map_err(Into::into)
}
