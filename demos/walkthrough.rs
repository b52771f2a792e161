use segalloc::{Segalloc, VecSource};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut allocator = Segalloc::new(VecSource::new())?;

    let greeting = allocator.alloc(64).ok_or("out of memory")?;
    allocator.payload_mut(greeting)[..12].copy_from_slice(b"hello, heap!");
    println!(
        "Requested 64 bytes, got {} usable at offset {}",
        allocator.usable_size(greeting),
        greeting.offset()
    );

    let big = allocator.alloc(4096).ok_or("out of memory")?;
    println!("\nStats after two allocations: {:#?}", allocator.stats());

    println!("\nNow let's grow the big block...");
    let big = allocator.resize(Some(big), 16384).ok_or("out of memory")?;
    println!(
        "It holds {} bytes and sits at offset {}",
        allocator.usable_size(big),
        big.offset()
    );

    println!("\nFreeing everything...");
    allocator.free(big);
    allocator.free(greeting);
    allocator.verify()?;
    println!("Final stats: {:#?}", allocator.stats());

    Ok(())
}
