use katman_alloc::{MAX_ALLOC, MIN_ALLOC, ThreadHeap};

#[test]
fn test_zero_and_tiny_sizes() {
    // Tiny requests round up to the minimum block.
    let ptr = ThreadHeap::allocate(1);
    assert!(!ptr.is_null());
    assert_eq!(ptr as usize % MIN_ALLOC, 0);
    unsafe { ptr.write_bytes(0xFF, 1) };
    ThreadHeap::deallocate(ptr);
}

#[test]
fn test_every_band_allocates() {
    let sizes = [
        8usize, 16, 24, 128, 144, 256, 288, 512, 576, 1024, 1152, 2048, 2304, 4096, 4608, 8192,
        9216, 16384, 18432, 32768, 36864, 65536, 73728, 131072, 147456, 262144,
    ];

    let mut ptrs = Vec::new();
    for &size in &sizes {
        let ptr = ThreadHeap::allocate(size);
        assert!(!ptr.is_null(), "allocation of {size} failed");
        // Touch first and last byte of the usable range.
        unsafe {
            ptr.write(1);
            ptr.add(size - 1).write(2);
        }
        ptrs.push(ptr);
    }

    for ptr in ptrs {
        ThreadHeap::deallocate(ptr);
    }
}

#[test]
fn test_interleaved_alloc_free() {
    let mut live: Vec<(*mut u8, usize)> = Vec::new();
    for round in 0..50usize {
        let size = 8 + (round * 40) % 2048;
        let ptr = ThreadHeap::allocate(size);
        assert!(!ptr.is_null());
        unsafe { ptr.write_bytes(round as u8, size) };
        live.push((ptr, size));

        // Free every other allocation as we go.
        if round % 2 == 1 {
            let (old, old_size) = live.swap_remove(round / 2 % live.len());
            unsafe {
                // The payload must still be intact when freed.
                assert_eq!(old.read(), old.add(old_size - 1).read());
            }
            ThreadHeap::deallocate(old);
        }
    }
    for (ptr, _) in live {
        ThreadHeap::deallocate(ptr);
    }
}

#[test]
fn test_data_integrity_across_neighbors() {
    // Fill neighboring blocks with distinct patterns and verify none of
    // them bleed into each other.
    const COUNT: usize = 64;
    const SIZE: usize = 96;

    let ptrs: Vec<*mut u8> = (0..COUNT)
        .map(|i| {
            let ptr = ThreadHeap::allocate(SIZE);
            assert!(!ptr.is_null());
            unsafe { ptr.write_bytes(i as u8, SIZE) };
            ptr
        })
        .collect();

    for (i, &ptr) in ptrs.iter().enumerate() {
        for offset in [0, SIZE / 2, SIZE - 1] {
            assert_eq!(unsafe { ptr.add(offset).read() }, i as u8);
        }
    }

    for ptr in ptrs {
        ThreadHeap::deallocate(ptr);
    }
}

#[test]
fn test_large_objects() {
    for size in [MAX_ALLOC + 1, MAX_ALLOC * 2, 5 * 1024 * 1024] {
        let ptr = ThreadHeap::allocate(size);
        assert!(!ptr.is_null(), "large allocation of {size} failed");
        unsafe {
            ptr.write(0xAA);
            ptr.add(size - 1).write(0xBB);
        }
        ThreadHeap::deallocate(ptr);
    }
}
