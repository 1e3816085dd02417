/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use log::warn;

use std::collections::HashMap;

use xrbridge_api::Error;
use xrbridge_api::PathHandle;
use xrbridge_api::RuntimeSession;

/// Interaction path strings the runtime has already interned.
#[derive(Debug, Default)]
pub struct PathCache {
    handles: HashMap<String, PathHandle>,
    paths: HashMap<PathHandle, String>,
}

impl PathCache {
    pub fn new() -> PathCache {
        PathCache::default()
    }

    /// The handle for `path`, asking the runtime only the first time.
    pub fn get(&mut self, runtime: &dyn RuntimeSession, path: &str) -> Result<PathHandle, Error> {
        if let Some(handle) = self.handles.get(path) {
            return Ok(*handle);
        }
        let handle = runtime.string_to_path(path).map_err(|err| {
            warn!("string_to_path({:?}) failed: {}", path, err);
            err
        })?;
        self.handles.insert(path.to_owned(), handle);
        self.paths.insert(handle, path.to_owned());
        Ok(handle)
    }

    pub fn path(&self, handle: PathHandle) -> Option<&str> {
        self.paths.get(&handle).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessRuntime;
    use xrbridge_api::MockRuntimeInit;

    #[test]
    fn paths_are_interned_once() {
        let (_sender, receiver) = xrbridge_api::channel();
        let runtime = HeadlessRuntime::new(MockRuntimeInit::default(), receiver);
        let mut cache = PathCache::new();

        let left = cache.get(&runtime, "/user/hand/left").unwrap();
        assert_eq!(cache.get(&runtime, "/user/hand/left").unwrap(), left);
        let right = cache.get(&runtime, "/user/hand/right").unwrap();
        assert_ne!(left, right);
        assert_eq!(runtime.stats().path_lookups, 2);

        assert_eq!(cache.path(right), Some("/user/hand/right"));
        assert!(cache.get(&runtime, "not a path").is_err());
        assert_eq!(cache.len(), 2);
    }
}
