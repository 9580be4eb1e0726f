//! License header prepended to every generated script.
use chrono::{Datelike, Local};
use nix::unistd::{Uid, User};

/// BSD 2-clause header as shell comments, followed by a blank line.
pub fn render_license(owner: &str, year: i32) -> String {
    format!(
        "\
#
# Copyright {year} {owner}
# All rights reserved.
#
# Redistribution and use in source and binary forms, with or without
# modification, are permitted provided that the following conditions
# are met:
# 1. Redistributions of source code must retain the above copyright
#    notice, this list of conditions and the following disclaimer.
# 2. Redistributions in binary form must reproduce the above copyright
#    notice, this list of conditions and the following disclaimer in the
#    documentation and/or other materials provided with the distribution.
#
# THIS SOFTWARE IS PROVIDED BY THE AUTHOR AND CONTRIBUTORS ``AS IS'' AND
# ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
# IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
# ARE DISCLAIMED.  IN NO EVENT SHALL THE AUTHOR OR CONTRIBUTORS BE LIABLE
# FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
# DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS
# OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION)
# HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT
# LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY
# OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF
# SUCH DAMAGE.
#
# $FreeBSD$
#

"
    )
}

/// Year in the local time zone.
pub fn current_year() -> i32 {
    Local::now().year()
}

/// Copyright owner: the explicit name, else the full name from the
/// password database, else `$USER`.
pub fn resolve_owner(explicit: Option<&str>) -> String {
    if let Some(name) = explicit.map(str::trim).filter(|name| !name.is_empty()) {
        return name.to_string();
    }
    if let Some(name) = passwd_full_name() {
        return name;
    }
    std::env::var("USER").unwrap_or_else(|_| "Unknown".to_string())
}

fn passwd_full_name() -> Option<String> {
    let user = match User::from_uid(Uid::current()) {
        Ok(user) => user?,
        Err(err) => {
            tracing::debug!(error = %err, "password database lookup failed");
            return None;
        }
    };
    full_name_from_gecos(&user.gecos.to_string_lossy())
}

/// First comma-separated GECOS field, e.g. `Jane Doe` from
/// `Jane Doe,Room 4,555-0100,`.
fn full_name_from_gecos(gecos: &str) -> Option<String> {
    gecos
        .split(',')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
