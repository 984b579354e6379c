//! **lumen** is an offline, physically-based renderer. Given a scene of
//! triangle meshes, spheres, and lights, it estimates the light-transport
//! integral by Monte-Carlo path tracing and resolves the result into a
//! tone-mapped image.
//!
//! Two estimators are provided: a unidirectional path tracer with
//! next-event estimation, and a bidirectional path tracer that connects
//! eye subpaths to light subpaths. Ray queries are accelerated by a
//! bounding-volume hierarchy built either by surface-area-heuristic
//! partitioning or by Morton-code ordering. Rendering is driven by a
//! pool of worker threads pulling pixel tiles from a shared queue.

pub mod accelerators;
pub mod core;
pub mod integrators;
pub mod lights;
pub mod shapes;
