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

//! Advertising data parsing.

use super::constants::{ad_type, MAX_NAME_LEN};

/// One `[len][type][data]` structure from advertising data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdStructure<'a> {
    pub ad_type: u8,
    pub data: &'a [u8],
}

/// Iterator over advertising data structures.
///
/// Stops at a zero length byte or at a structure running past the end.
pub struct AdIterator<'a> {
    data: &'a [u8],
}

impl<'a> AdIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for AdIterator<'a> {
    type Item = AdStructure<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&len, rest) = self.data.split_first()?;
        let len = len as usize;
        if len == 0 || len > rest.len() {
            self.data = &[];
            return None;
        }

        let (structure, remaining) = rest.split_at(len);
        self.data = remaining;
        Some(AdStructure {
            ad_type: structure[0],
            data: &structure[1..],
        })
    }
}

/// Extract the local name (complete or shortened) from advertising data.
///
/// The last name structure wins; names are cut to [`MAX_NAME_LEN`] bytes.
pub fn local_name(data: &[u8]) -> Option<String> {
    let mut name = None;
    for ad in AdIterator::new(data) {
        match ad.ad_type {
            ad_type::COMPLETE_LOCAL_NAME | ad_type::SHORTENED_LOCAL_NAME => {
                let len = ad.data.len().min(MAX_NAME_LEN);
                name = Some(String::from_utf8_lossy(&ad.data[..len]).into_owned());
            }
            _ => {}
        }
    }
    name
}

/// Case-sensitive prefix match of the advertised name against `target`.
pub fn matches_name(name: &str, target: &str) -> bool {
    !target.is_empty() && name.starts_with(target)
}

/// Build a name structure. Used by collaborators that only expose the
/// decoded device name.
pub fn name_structure(name: &str) -> Vec<u8> {
    let bytes = name.as_bytes();
    let len = bytes.len().min(u8::MAX as usize - 1);
    let mut out = Vec::with_capacity(len + 2);
    out.push(len as u8 + 1);
    out.push(ad_type::COMPLETE_LOCAL_NAME);
    out.extend_from_slice(&bytes[..len]);
    out
}
