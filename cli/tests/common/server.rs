// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use subprocess::unix::PopenExt;
use subprocess::{Popen, PopenConfig};

use super::Error;

/// A long-running role binary spawned from the workspace's shared
/// `target/` directory, terminated at the end of a test.
#[derive(Debug)]
pub struct Server {
    popen: Popen,
}

impl Server {
    pub fn start(bin_name: &str, args: &[&str]) -> Result<Self, Error> {
        let path = format!("../target/release/{bin_name}");
        let mut argv = vec![path.as_str()];
        argv.extend_from_slice(args);
        let popen = Popen::create(&argv, PopenConfig::default())?;
        Ok(Self { popen })
    }

    pub fn terminate(&mut self) -> Result<(), Error> {
        self.popen.terminate()?;
        let _ = self.popen.wait_timeout(std::time::Duration::from_secs(2))?;
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}
