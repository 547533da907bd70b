// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Host/firmware command protocol.
//!
//! Every message crossing the USB link or either queue is an [`Envelope`].

pub mod envelope;
pub mod stream;

pub use envelope::{decode, encode, CommandKind, Envelope, EnvelopeError, MAX_PAYLOAD};
pub use stream::EnvelopeStream;
