// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The published repository tree.

```text
<root>/
  KEY.asc
  pool/<component>/<channel subdir>/<artifact>.deb{,.sha256}
  dists/<distribution>/{Release,Release.gpg,InRelease}
  dists/<distribution>/<component>/binary-<arch>/Packages{,.gz}
```

See <https://wiki.debian.org/DebianRepository/Format> for the format
clients expect.
*/

pub mod index;
pub mod layout;
pub mod release;
