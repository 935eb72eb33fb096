// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// The OS level step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CreateKeyFile,
    DeriveKey,
    Create,
    Attach,
    Inspect,
    SetValue,
    GetValue,
    Adjust,
    Remove,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Step::CreateKeyFile => "create semaphore key file",
            Step::DeriveKey => "derive semaphore key from",
            Step::Create => "create semaphore set for",
            Step::Attach => "attach to semaphore set for",
            Step::Inspect => "inspect semaphore set for",
            Step::SetValue => "set semaphore value for",
            Step::GetValue => "read semaphore value for",
            Step::Adjust => "adjust semaphore for",
            Step::Remove => "remove semaphore set for",
        };
        write!(f, "{step}")
    }
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("unable to {step} {}: {source}", path.display())]
    Os {
        step: Step,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no semaphore set exists for {}", .0.display())]
    Missing(PathBuf),
    #[error("semaphore state lock poisoned")]
    Poisoned,
}

impl IpcError {
    pub fn os(step: Step, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Os {
            step,
            path: path.into(),
            source,
        }
    }

    /// The failed step, if the error originates from the OS.
    pub fn step(&self) -> Option<Step> {
        match self {
            IpcError::Os { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl<S> From<std::sync::PoisonError<S>> for IpcError {
    fn from(_: std::sync::PoisonError<S>) -> Self {
        Self::Poisoned
    }
}
