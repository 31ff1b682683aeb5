/*
 * Copyright 2020 Nikhil Marathe <nsm.nikhil@gmail.com>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Tuple-shaped emplacement: `emplace_all((f1, f2, f3))` returns the
//! positional tuple of per-closure handles, the closest Rust gets to a
//! variadic call. Implemented for arities 0 through 8; bind each handle by
//! destructuring.

use flow_graph::Task;

use crate::{promise::Promise, Taskflow};

/// A set of value-returning closures that can be emplaced in one call.
pub trait TaskSet {
    type Handles;
    fn emplace_into(self, taskflow: &mut Taskflow) -> Self::Handles;
}

/// A set of closures emplaced without result channels.
pub trait SilentTaskSet {
    type Handles;
    fn emplace_into(self, taskflow: &mut Taskflow) -> Self::Handles;
}

impl TaskSet for () {
    type Handles = ();
    fn emplace_into(self, _taskflow: &mut Taskflow) -> Self::Handles {}
}

impl SilentTaskSet for () {
    type Handles = ();
    fn emplace_into(self, _taskflow: &mut Taskflow) -> Self::Handles {}
}

macro_rules! as_task {
    ($F:ident) => {
        Task
    };
}

macro_rules! emplace_tuple {
    ($(($F:ident, $T:ident, $f:ident)),+) => {
        impl<$($F, $T),+> TaskSet for ($($F,)+)
        where
            $($F: FnOnce() -> $T + Send + 'static, $T: Send + 'static),+
        {
            type Handles = ($((Task, Promise<$T>),)+);

            fn emplace_into(self, taskflow: &mut Taskflow) -> Self::Handles {
                let ($($f,)+) = self;
                ($(taskflow.emplace($f),)+)
            }
        }

        impl<$($F, $T),+> SilentTaskSet for ($($F,)+)
        where
            $($F: FnOnce() -> $T + Send + 'static),+
        {
            type Handles = ($(as_task!($F),)+);

            fn emplace_into(self, taskflow: &mut Taskflow) -> Self::Handles {
                let ($($f,)+) = self;
                ($(taskflow.silent_emplace($f),)+)
            }
        }
    };
}

emplace_tuple!((F1, T1, f1));
emplace_tuple!((F1, T1, f1), (F2, T2, f2));
emplace_tuple!((F1, T1, f1), (F2, T2, f2), (F3, T3, f3));
emplace_tuple!((F1, T1, f1), (F2, T2, f2), (F3, T3, f3), (F4, T4, f4));
emplace_tuple!(
    (F1, T1, f1),
    (F2, T2, f2),
    (F3, T3, f3),
    (F4, T4, f4),
    (F5, T5, f5)
);
emplace_tuple!(
    (F1, T1, f1),
    (F2, T2, f2),
    (F3, T3, f3),
    (F4, T4, f4),
    (F5, T5, f5),
    (F6, T6, f6)
);
emplace_tuple!(
    (F1, T1, f1),
    (F2, T2, f2),
    (F3, T3, f3),
    (F4, T4, f4),
    (F5, T5, f5),
    (F6, T6, f6),
    (F7, T7, f7)
);
emplace_tuple!(
    (F1, T1, f1),
    (F2, T2, f2),
    (F3, T3, f3),
    (F4, T4, f4),
    (F5, T5, f5),
    (F6, T6, f6),
    (F7, T7, f7),
    (F8, T8, f8)
);
