/*!
 * Example processor families used by the end-to-end scenario tests.
 * Not part of the generic PROC runtime itself — these live alongside
 * it the way `ipc::shm::segment`'s simulated backing store sits next
 * to the abstraction it exercises.
 */

pub mod bypass;
