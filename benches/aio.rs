#![feature(test)]
extern crate fibers_global;
extern crate libc;
extern crate radosbridge;
extern crate test;
#[macro_use]
extern crate trackable;

use fibers_global::execute;
use radosbridge::aio::Callbacks;
use radosbridge::backend::MemoryBackend;
use radosbridge::buffer::GrowRetryPolicy;
use radosbridge::Connection;
use test::Bencher;

#[bench]
fn memory_write_full_small(b: &mut Bencher) {
    let cluster = track_try_unwrap!(Connection::new()
        .use_config_map(vec![("memory_pools", "data")])
        .connect::<MemoryBackend>());
    let pool = track_try_unwrap!(cluster.open_pool("data"));
    let object = track_try_unwrap!(pool.async_mode("foo", &Callbacks::<()>::new()));

    b.iter(|| {
        track_try_unwrap!(execute(object.write_full(b"foo").safe()));
    });
}

#[bench]
fn memory_append_and_read_small(b: &mut Bencher) {
    let cluster = track_try_unwrap!(Connection::new()
        .use_config_map(vec![("memory_pools", "data")])
        .connect::<MemoryBackend>());
    let pool = track_try_unwrap!(cluster.open_pool("data"));
    let object = track_try_unwrap!(pool.async_mode("foo", &Callbacks::<()>::new()));

    b.iter(|| {
        track_try_unwrap!(execute(object.append(b"bar").both()));
        track_try_unwrap!(execute(object.read(3, 0).both()));
    });
}

#[bench]
fn grow_retry_from_empty_buffer(b: &mut Bencher) {
    b.iter(|| {
        track_try_unwrap!(GrowRetryPolicy::new(0).run(|buf| {
            if buf.len() < 4096 {
                -libc::ERANGE
            } else {
                0
            }
        }));
    });
}
