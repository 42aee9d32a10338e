use std::ffi::CString;
use std::ops::Deref;
use std::ptr::NonNull;
use std::time::Duration;

use crate::error::{FtError, Result};
use crate::layout::ShmRecord;

/// How a region was obtained by [`map_shared_memory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// This call created the object; its contents are all zero.
    Created,
    /// The object already existed and may be in use by other processes.
    Opened,
}

fn c_name(shared_memory_name: &str) -> std::io::Result<CString> {
    CString::new(shared_memory_name).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "shared-memory name contains a NUL byte",
        )
    })
}

/// Maps the POSIX shared-memory object `shared_memory_name` read-write.
///
/// With `create` set, the object is created if missing (exclusive create
/// first, so the caller learns whether it was the creator). Without it, a
/// missing object is an error. An existing object that was never sized is
/// truncated to `size`; one with a different non-zero size is rejected.
pub(crate) fn map_shared_memory(
    shared_memory_name: &str,
    size: usize,
    create: bool,
) -> Result<(NonNull<u8>, Attach)> {
    let fail = |err: std::io::Error| FtError::shm(shared_memory_name, err);
    let name = c_name(shared_memory_name).map_err(fail)?;

    let (fd, attach) = unsafe {
        let mut attach = Attach::Opened;
        let mut fd = -1;
        if create {
            fd = libc::shm_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            );
            if fd != -1 {
                attach = Attach::Created;
            } else {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EEXIST) {
                    return Err(fail(err));
                }
            }
        }
        if fd == -1 {
            fd = libc::shm_open(name.as_ptr(), libc::O_RDWR, 0o600);
            if fd == -1 {
                return Err(fail(std::io::Error::last_os_error()));
            }
        }
        (fd, attach)
    };

    let addr = unsafe {
        let mut current = 0usize;
        if attach == Attach::Opened {
            let mut st: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut st) == -1 {
                let err = std::io::Error::last_os_error();
                libc::close(fd);
                return Err(fail(err));
            }
            current = st.st_size as usize;
        }
        if current != 0 && current != size {
            libc::close(fd);
            return Err(FtError::layout(
                shared_memory_name,
                format!("region is {current} bytes, expected {size}"),
            ));
        }

        // Openers may race the creator's truncate; both ask for the same size.
        if current == 0 && libc::ftruncate(fd, size as libc::off_t) == -1 {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(fail(err));
        }

        let addr = libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );

        if addr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(fail(err));
        } else {
            libc::close(fd); // mapping stays valid
        }

        addr
    };

    let ptr = NonNull::new(addr as *mut u8).ok_or_else(|| {
        fail(std::io::Error::other("mmap returned a null address"))
    })?;
    Ok((ptr, attach))
}

pub(crate) unsafe fn unmap_shared_memory(
    ptr: NonNull<u8>,
    size: usize,
) -> std::io::Result<()> {
    unsafe {
        if libc::munmap(ptr.as_ptr().cast(), size) == -1 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Removes the name of a shared-memory object.
///
/// Existing mappings stay valid; the memory is released once the last one
/// is unmapped. A name that is already gone is not an error.
pub fn unlink_shared_memory(shared_memory_name: &str) -> Result<()> {
    let fail = |err: std::io::Error| FtError::shm(shared_memory_name, err);
    let name = c_name(shared_memory_name).map_err(fail)?;
    if unsafe { libc::shm_unlink(name.as_ptr()) } == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ENOENT) {
            return Err(fail(err));
        }
    }
    Ok(())
}

#[derive(Debug)]
enum Backing {
    Shared { name: String },
    Local,
}

/// Typed view of one record, either in named shared memory or on the heap.
///
/// A shared region is unmapped when the `Region` is dropped; the name is
/// left alone (see [`Region::unlink`]). A local region is a heap copy of the
/// same record, for in-process use.
pub struct Region<T: ShmRecord> {
    ptr: NonNull<T>,
    backing: Backing,
}

unsafe impl<T: ShmRecord> Send for Region<T> {}
unsafe impl<T: ShmRecord> Sync for Region<T> {}

impl<T: ShmRecord> Region<T> {
    const SIZE: usize = std::mem::size_of::<T>();

    /// Maps `name` without looking at its contents.
    pub(crate) fn attach(name: &str, create: bool) -> Result<(Self, Attach)> {
        let (ptr, attach) = map_shared_memory(name, Self::SIZE, create)?;
        Ok((
            Self {
                ptr: ptr.cast(),
                backing: Backing::Shared {
                    name: name.to_string(),
                },
            },
            attach,
        ))
    }

    /// Opens `name`, creating it if needed.
    ///
    /// The creator runs `init` on the zeroed record and then publishes the
    /// header; everyone else waits up to `timeout` for that header and
    /// validates it.
    pub(crate) fn open_or_create(
        name: &str,
        timeout: Duration,
        init: impl FnOnce(&T) -> Result<()>,
    ) -> Result<(Self, Attach)> {
        let (region, attach) = Self::attach(name, true)?;
        match attach {
            Attach::Created => {
                init(&*region)?;
                region.publish();
                tracing::debug!(region = name, size = Self::SIZE, "created shared region");
            }
            Attach::Opened => {
                region
                    .header()
                    .wait_published(name, T::MAGIC, Self::SIZE, timeout)?;
                tracing::debug!(region = name, "attached to shared region");
            }
        }
        Ok((region, attach))
    }

    /// Opens an existing, published region.
    pub(crate) fn open(name: &str, timeout: Duration) -> Result<Self> {
        let (region, _) = Self::attach(name, false)?;
        region
            .header()
            .wait_published(name, T::MAGIC, Self::SIZE, timeout)?;
        Ok(region)
    }

    /// A zeroed heap record with the same layout.
    pub(crate) fn local() -> Self {
        let boxed: Box<T> = unsafe { Box::<T>::new_zeroed().assume_init() };
        Self {
            ptr: NonNull::from(Box::leak(boxed)),
            backing: Backing::Local,
        }
    }

    /// Marks the record as initialized for every opener.
    pub(crate) fn publish(&self) {
        self.header().publish(T::MAGIC, Self::SIZE);
    }

    /// Exclusive access, for filling in a record nobody else can see yet.
    pub(crate) fn get_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.backing {
            Backing::Shared { name } => Some(name),
            Backing::Local => None,
        }
    }

    pub fn unlink(&self) -> Result<()> {
        match &self.backing {
            Backing::Shared { name } => unlink_shared_memory(name),
            Backing::Local => Ok(()),
        }
    }
}

impl<T: ShmRecord> std::fmt::Debug for Region<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("ptr", &self.ptr)
            .field("backing", &self.backing)
            .field("size", &Self::SIZE)
            .finish()
    }
}

impl<T: ShmRecord> Deref for Region<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ShmRecord> Drop for Region<T> {
    fn drop(&mut self) {
        match &self.backing {
            Backing::Shared { name } => {
                if let Err(err) = unsafe { unmap_shared_memory(self.ptr.cast(), Self::SIZE) } {
                    tracing::error!(region = %name, error = %err, "failed to unmap shared region");
                }
            }
            Backing::Local => unsafe {
                drop(Box::from_raw(self.ptr.as_ptr()));
            },
        }
    }
}
