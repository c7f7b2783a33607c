// SPDX-License-Identifier: MPL-2.0

pub(crate) use alloc::{
    boxed::Box,
    sync::{Arc, Weak},
    vec::Vec,
};

pub(crate) use log::{debug, trace, warn};

pub(crate) use crate::{
    Result,
    error::{Errno::*, Error},
    return_errno, return_errno_with_msg,
};
