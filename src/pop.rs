// Copyright 2017-2018 the authors. See the 'Copyright and license' section of the
// README.md file at the top-level directory of this repository.
//
// Licensed under the Apache License, Version 2.0 (the LICENSE-APACHE file) or
// the MIT license (the LICENSE-MIT file) at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Outcomes of a single pop attempt.

/// Ways that a single `try_pop` can fail to return a node.
///
/// Neither variant is an error in the usual sense. `Empty` is a definitive
/// answer for the instant at which the queue was observed, while `LostRace`
/// means some other thread made progress instead and the caller should retry
/// (possibly after backing off).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PopStatus {
    Empty,
    LostRace,
}

pub type PopResult<T> = Result<T, PopStatus>;
