// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A generational, stable-handle object pool built from three layered
// primitives: a power-of-two `CircularBuffer`, a hierarchical free-bitmap
// `IndexPyramid`, and a chunked `SlotPool` allocator on top of both. Ported
// from Johannes Teichrieb's `circbuf`/`idxpyr`/`mempoolEbr` reference
// sources, shaped the way this workspace's own `libipc`-derived layout
// shapes one module per primitive.
//
// Single-owner access is assumed throughout: nothing here is `Sync`, and
// none of it should be wrapped in a mutex and called concurrently — see
// `SlotPool`'s docs for the intended single-threaded, borrow-checked usage.

pub mod bits;
pub mod pool;
pub mod pyramid;
pub mod ring;

pub use pool::{Id, PoolError, PoolResult, PoolSettings, SlotPool};
pub use pyramid::IndexPyramid;
pub use ring::CircularBuffer;
