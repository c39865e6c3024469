use std::marker::PhantomData;
use std::sync::MutexGuard;

pub mod bits;
pub mod optimistic_lock;

pub type PhantomUnsend = PhantomData<MutexGuard<'static, ()>>;
